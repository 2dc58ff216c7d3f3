//! Mock places provider
//!
//! Serves synthetic restaurants over the provider's search and detail
//! endpoints for local dry runs of grid-harvest.
//!
//! Usage:
//!   cargo run --bin mock-places -- --port 8088 --quota-after 500
//!   cargo run --bin grid-harvest -- run --base-url http://127.0.0.1:8088/v3

use clap::Parser;
use grid_harvest::domain::types::BoundingBox;
use grid_harvest::io::mock_places::{start_mock_server, MockPlaces};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock-places")]
#[command(about = "Mock places provider for local harvest runs")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "8088")]
    port: u16,

    /// Number of synthetic restaurants spread over the region
    #[arg(short, long, default_value = "2000")]
    businesses: usize,

    /// Answer 429 ACCESS_LIMIT_REACHED after this many requests
    #[arg(long)]
    quota_after: Option<u64>,

    /// Region as north,south,east,west (default: Maryland)
    #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
    bbox: Option<Vec<f64>>,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let bbox = match args.bbox.as_deref() {
        Some([north, south, east, west]) => BoundingBox::new(*north, *south, *east, *west),
        _ => BoundingBox::maryland(),
    };
    if !bbox.is_valid() {
        error!(bbox = ?bbox, "invalid_bbox");
        std::process::exit(2);
    }

    let places = Arc::new(MockPlaces::new(bbox, args.businesses, args.quota_after));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    if let Err(e) = start_mock_server(addr, places, shutdown_rx).await {
        error!(error = %format!("{e:#}"), "mock_places_failed");
        std::process::exit(1);
    }
}
