//! Places provider access (Yelp Fusion v3 shaped API)
//!
//! `PlacesApi` is the seam the harvester talks to. `YelpClient` is the HTTP
//! implementation; tests and dry runs substitute their own.
//!
//! Endpoints:
//! - `GET {base}/businesses/search?latitude&longitude&radius&categories&limit&offset`
//! - `GET {base}/businesses/{id}`

use crate::domain::business::{BusinessDetails, SearchPage};
use crate::domain::types::Coordinate;
use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

/// Provider error codes that mean the caller ran out of quota
const QUOTA_ERROR_CODES: [&str; 3] =
    ["ACCESS_LIMIT_REACHED", "TOO_MANY_REQUESTS_PER_SECOND", "DAILY_LIMIT_REACHED"];

/// Failure of a single remote call
#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("quota exceeded (HTTP {status}, code {code:?})")]
    QuotaExceeded { status: u16, code: Option<String> },
    #[error("business not found: {0}")]
    NotFound(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error")]
    Transport(#[source] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl PlacesError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, PlacesError::QuotaExceeded { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlacesError::QuotaExceeded { .. } => "quota",
            PlacesError::NotFound(_) => "not_found",
            PlacesError::Timeout => "timeout",
            PlacesError::Status { .. } => "status",
            PlacesError::Transport(_) => "transport",
            PlacesError::Decode(_) => "decode",
        }
    }

    /// Classify a non-success response from its status and body
    pub fn from_response(status: StatusCode, body: &str, business_id: Option<&str>) -> Self {
        let code = serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error);

        let quota_code = code
            .as_ref()
            .and_then(|e| e.code.as_deref())
            .is_some_and(|c| QUOTA_ERROR_CODES.contains(&c));

        if status == StatusCode::TOO_MANY_REQUESTS || quota_code {
            return PlacesError::QuotaExceeded {
                status: status.as_u16(),
                code: code.and_then(|e| e.code),
            };
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = business_id {
                return PlacesError::NotFound(id.to_string());
            }
        }

        let message = code
            .and_then(|e| e.description.or(e.code))
            .unwrap_or_else(|| body.chars().take(200).collect());
        PlacesError::Status { status: status.as_u16(), message }
    }
}

impl From<reqwest::Error> for PlacesError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlacesError::Timeout
        } else if err.is_decode() {
            PlacesError::Decode(err.to_string())
        } else {
            PlacesError::Transport(err)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// One page request for a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchQuery {
    pub center: Coordinate,
    pub radius_m: u32,
    pub offset: u32,
    pub limit: u32,
}

/// Search and detail capabilities of the places provider
#[async_trait]
pub trait PlacesApi: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, PlacesError>;

    async fn business(&self, id: &str) -> Result<BusinessDetails, PlacesError>;
}

/// HTTP client for the provider
pub struct YelpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    category: String,
    term: String,
    sort_by: String,
}

impl YelpClient {
    pub fn new(config: &Config, api_key: String) -> anyhow::Result<Self> {
        // One client for the whole run (connection pooling); timeout covers
        // connect + full body
        let http = reqwest::Client::builder()
            .timeout(config.api_timeout())
            .user_agent(concat!("grid-harvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api_base_url().to_string(),
            api_key,
            category: config.api_category().to_string(),
            term: config.api_term().to_string(),
            sort_by: config.api_sort_by().to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        business_id: Option<&str>,
    ) -> Result<T, PlacesError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlacesError::from_response(status, &body, business_id));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| PlacesError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PlacesApi for YelpClient {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, PlacesError> {
        let url = format!("{}/businesses/search", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("latitude", format!("{:.6}", query.center.lat)),
            ("longitude", format!("{:.6}", query.center.lng)),
            ("radius", query.radius_m.to_string()),
            ("categories", self.category.clone()),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
            ("sort_by", self.sort_by.clone()),
        ];
        if !self.term.is_empty() {
            params.push(("term", self.term.clone()));
        }

        debug!(offset = %query.offset, radius_m = %query.radius_m, "places_search_request");
        self.get_json(self.http.get(url).query(&params), None).await
    }

    async fn business(&self, id: &str) -> Result<BusinessDetails, PlacesError> {
        let url = format!("{}/businesses/{}", self.base_url, id);
        debug!(id = %id, "places_detail_request");
        self.get_json(self.http.get(url), Some(id)).await
    }
}
