//! Local stand-in for the places provider
//!
//! Serves a deterministic pool of synthetic restaurants scattered over a
//! bounding box:
//! - `GET /v3/businesses/search` - businesses within `radius` of
//!   `latitude`/`longitude`, nearest first, paged by `offset`/`limit`
//! - `GET /v3/businesses/{id}` - full detail, 404 for unknown ids
//!
//! With `quota_after = N`, every request after the N-th answers 429
//! `ACCESS_LIMIT_REACHED`.

use crate::domain::types::{BoundingBox, Coordinate, METERS_PER_DEGREE};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const CUISINES: [(&str, &str); 6] = [
    ("pizza", "Pizza"),
    ("seafood", "Seafood"),
    ("mexican", "Mexican"),
    ("italian", "Italian"),
    ("chinese", "Chinese"),
    ("tradamerican", "American (Traditional)"),
];

const CITIES: [&str; 5] = ["Baltimore", "Annapolis", "Frederick", "Rockville", "Salisbury"];

/// Provider cap on offset + limit
const MAX_RESULT_WINDOW: usize = 1000;

/// One synthetic restaurant
#[derive(Debug, Clone)]
struct MockBusiness {
    id: String,
    position: Coordinate,
    index: usize,
}

impl MockBusiness {
    fn detail_json(&self) -> Value {
        let (alias, title) = CUISINES[self.index % CUISINES.len()];
        let city = CITIES[self.index % CITIES.len()];
        let street = format!("{} Main St", 100 + self.index);
        let zip = format!("21{:03}", self.index % 1000);
        json!({
            "id": self.id,
            "alias": format!("mock-restaurant-{}", self.index),
            "name": format!("Mock Restaurant {}", self.index),
            "url": format!("https://mock.places.test/biz/{}", self.id),
            "phone": format!("+1410555{:04}", self.index % 10_000),
            "rating": 1.0 + (self.index % 9) as f64 * 0.5,
            "review_count": (self.index * 37) % 2000,
            "price": "$".repeat(1 + self.index % 4),
            "categories": [{ "alias": alias, "title": title }],
            "location": {
                "address1": street,
                "city": city,
                "state": "MD",
                "zip_code": zip,
                "display_address": [street, format!("{city}, MD {zip}")]
            },
            "coordinates": { "latitude": self.position.lat, "longitude": self.position.lng }
        })
    }

    fn summary_json(&self, distance_m: f64) -> Value {
        json!({
            "id": self.id,
            "name": format!("Mock Restaurant {}", self.index),
            "distance": distance_m
        })
    }
}

/// Shared server state
pub struct MockPlaces {
    businesses: Vec<MockBusiness>,
    by_id: FxHashMap<String, usize>,
    quota_after: Option<u64>,
    requests: AtomicU64,
}

impl MockPlaces {
    /// Scatter `count` businesses over `bbox` with a fixed-seed generator
    pub fn new(bbox: BoundingBox, count: usize, quota_after: Option<u64>) -> Self {
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next_unit = move || {
            // xorshift64*
            seed ^= seed >> 12;
            seed ^= seed << 25;
            seed ^= seed >> 27;
            (seed.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
        };

        let businesses: Vec<MockBusiness> = (0..count)
            .map(|index| {
                let lat = bbox.south + next_unit() * bbox.lat_span();
                let lng = bbox.west + next_unit() * bbox.lng_span();
                MockBusiness {
                    id: format!("mock-{index:05}"),
                    position: Coordinate::new(lat, lng),
                    index,
                }
            })
            .collect();
        let by_id = businesses.iter().enumerate().map(|(i, b)| (b.id.clone(), i)).collect();

        Self { businesses, by_id, quota_after, requests: AtomicU64::new(0) }
    }

    pub fn business_count(&self) -> usize {
        self.businesses.len()
    }

    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Counts the request; true once the quota is spent
    fn quota_spent(&self) -> bool {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.quota_after.is_some_and(|limit| n > limit)
    }

    fn search(&self, query: &str) -> Result<Value, String> {
        let params = parse_query(query);
        let number = |key: &str| -> Result<f64, String> {
            params
                .get(key)
                .ok_or_else(|| format!("missing parameter {key}"))?
                .parse::<f64>()
                .map_err(|_| format!("invalid parameter {key}"))
        };

        let center = Coordinate::new(number("latitude")?, number("longitude")?);
        let radius = number("radius")?;
        let limit = params.get("limit").and_then(|v| v.parse::<usize>().ok()).unwrap_or(20);
        let offset = params.get("offset").and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);

        if radius > 40_000.0 {
            return Err("radius must be at most 40000".to_string());
        }
        if limit > 50 {
            return Err("limit must be at most 50".to_string());
        }
        if offset + limit > MAX_RESULT_WINDOW {
            return Err("offset + limit must be at most 1000".to_string());
        }

        let mut hits: Vec<(f64, &MockBusiness)> = self
            .businesses
            .iter()
            .map(|b| (distance_m(center, b.position), b))
            .filter(|(d, _)| *d <= radius)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.index.cmp(&b.1.index)));

        let total = hits.len();
        let page: Vec<Value> =
            hits.iter().skip(offset).take(limit).map(|(d, b)| b.summary_json(*d)).collect();

        debug!(total = %total, offset = %offset, returned = %page.len(), "mock_search");
        Ok(json!({ "businesses": page, "total": total }))
    }

    fn detail(&self, id: &str) -> Option<Value> {
        self.by_id.get(id).map(|&i| self.businesses[i].detail_json())
    }
}

fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    let dy = (a.lat - b.lat) * METERS_PER_DEGREE;
    let dx = (a.lng - b.lng) * METERS_PER_DEGREE * ((a.lat + b.lat) / 2.0).to_radians().cos();
    dx.hypot(dy)
}

/// Minimal `k=v&k=v` parser; values are numeric or plain words
fn parse_query(query: &str) -> FxHashMap<&str, &str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn error_response(status: StatusCode, code: &str, description: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({ "error": { "code": code, "description": description } }))
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    places: Arc<MockPlaces>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    let path = path.strip_prefix("/v3").unwrap_or(path);

    if req.method() == Method::GET && path == "/health" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"));
    }

    if req.method() != Method::GET {
        return Ok(error_response(StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", "GET only"));
    }

    if places.quota_spent() {
        info!(served = %places.requests_served(), "mock_quota_exceeded");
        return Ok(error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "ACCESS_LIMIT_REACHED",
            "You've reached the access limit for this client",
        ));
    }

    let response = match path {
        "/businesses/search" => match places.search(req.uri().query().unwrap_or("")) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(msg) => error_response(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", &msg),
        },
        _ => match path.strip_prefix("/businesses/") {
            Some(id) if !id.is_empty() && !id.contains('/') => match places.detail(id) {
                Some(body) => json_response(StatusCode::OK, body),
                None => error_response(
                    StatusCode::NOT_FOUND,
                    "BUSINESS_NOT_FOUND",
                    "The requested business could not be found.",
                ),
            },
            _ => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Unknown path"),
        },
    };
    Ok(response)
}

/// Serve on an already bound listener until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    places: Arc<MockPlaces>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(
        addr = %addr,
        businesses = %places.business_count(),
        quota_after = ?places.quota_after,
        "mock_places_started"
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let places = places.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let places = places.clone();
                                async move { handle_request(req, places).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "mock_places_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "mock_places_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mock_places_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind `addr` and serve
pub async fn start_mock_server(
    addr: SocketAddr,
    places: Arc<MockPlaces>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, places, shutdown).await
}
