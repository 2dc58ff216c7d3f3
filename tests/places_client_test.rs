//! HTTP client tests against the local mock provider

use grid_harvest::domain::types::{BoundingBox, Coordinate};
use grid_harvest::infra::{Config, HarvestMetrics};
use grid_harvest::io::dataset::read_records;
use grid_harvest::io::mock_places::{serve, MockPlaces};
use grid_harvest::io::{CheckpointStore, PlacesApi, PlacesError, SearchQuery, YelpClient};
use grid_harvest::services::{GeoGrid, Harvester, EXIT_QUOTA_EXCEEDED};
use rustc_hash::FxHashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::watch;

fn test_box() -> BoundingBox {
    BoundingBox::new(39.0, 38.0, -76.0, -77.0)
}

/// Start a mock server on an ephemeral port; the sender keeps it alive
async fn start_mock(count: usize, quota_after: Option<u64>) -> (SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let places = Arc::new(MockPlaces::new(test_box(), count, quota_after));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        serve(listener, places, shutdown_rx).await.unwrap();
    });
    (addr, shutdown_tx)
}

fn config_for(addr: SocketAddr) -> Config {
    Config::default()
        .with_api_base_url(format!("http://{addr}/v3/"))
        .with_bbox(test_box())
        .with_grid(2, 2)
}

fn client(addr: SocketAddr) -> YelpClient {
    YelpClient::new(&config_for(addr), "test-key".to_string()).unwrap()
}

fn center_query(offset: u32) -> SearchQuery {
    SearchQuery { center: Coordinate::new(38.5, -76.5), radius_m: 40_000, offset, limit: 50 }
}

#[tokio::test]
async fn test_search_returns_a_page() {
    let (addr, _shutdown) = start_mock(300, None).await;
    let client = client(addr);

    let first = client.search(&center_query(0)).await.unwrap();
    let second = client.search(&center_query(50)).await.unwrap();

    assert_eq!(first.len(), 50);
    assert!(first.total.unwrap() > 50);
    let first_ids: FxHashSet<&str> = first.businesses.iter().map(|b| b.id.as_str()).collect();
    assert!(second.businesses.iter().all(|b| !first_ids.contains(b.id.as_str())));
}

#[tokio::test]
async fn test_business_detail_is_decoded() {
    let (addr, _shutdown) = start_mock(20, None).await;
    let client = client(addr);

    let details = client.business("mock-00003").await.unwrap();
    assert_eq!(details.id, "mock-00003");
    assert_eq!(details.name, "Mock Restaurant 3");
    assert_eq!(details.location.state.as_deref(), Some("MD"));
    assert_eq!(details.location.display_address.len(), 2);
    assert!(details.coordinates.latitude.is_some());
    assert!(details.extra.contains_key("alias"));
}

#[tokio::test]
async fn test_unknown_business_is_not_found() {
    let (addr, _shutdown) = start_mock(20, None).await;
    let err = client(addr).business("missing").await.unwrap_err();
    assert!(matches!(err, PlacesError::NotFound(ref id) if id == "missing"));
}

#[tokio::test]
async fn test_validation_error_is_status() {
    let (addr, _shutdown) = start_mock(20, None).await;
    let err = client(addr).search(&center_query(980)).await.unwrap_err();
    match err {
        PlacesError::Status { status, .. } => assert_eq!(status, 400),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_429_is_quota_exceeded() {
    let (addr, _shutdown) = start_mock(20, Some(1)).await;
    let client = client(addr);

    assert!(client.search(&center_query(0)).await.is_ok());
    let err = client.search(&center_query(0)).await.unwrap_err();
    match err {
        PlacesError::QuotaExceeded { status, code } => {
            assert_eq!(status, 429);
            assert_eq!(code.as_deref(), Some("ACCESS_LIMIT_REACHED"));
        }
        other => panic!("expected quota error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    // Bind then drop to get a port nobody listens on
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let err = client(addr).search(&center_query(0)).await.unwrap_err();
    assert!(matches!(err, PlacesError::Transport(_)));
}

#[tokio::test]
async fn test_end_to_end_harvest_over_http() {
    let (addr, _shutdown) = start_mock(400, None).await;
    let dir = tempdir().unwrap();
    let config = config_for(addr).with_output_dir(dir.path());

    let grid = GeoGrid::new(config.bbox(), config.grid_rows(), config.grid_cols()).unwrap();
    let mut state = CheckpointStore::new(config.grid_path(), config.dataset_path()).load(&grid).unwrap();
    let places = Arc::new(YelpClient::new(&config, "test-key".to_string()).unwrap());
    let metrics = Arc::new(HarvestMetrics::new());

    let mut harvester = Harvester::from_config(&config, places, metrics.clone()).unwrap();
    let outcome = harvester.run(&mut state).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert!(state.is_complete());

    let records = read_records(&config.dataset_path()).unwrap();
    let unique: FxHashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(unique.len(), records.len());
    assert!(!records.is_empty());
    assert_eq!(metrics.records_written() as usize, records.len());
    assert!(metrics.report().duplicates_skipped > 0);
}

#[tokio::test]
async fn test_end_to_end_quota_abort_over_http() {
    let (addr, _shutdown) = start_mock(400, Some(5)).await;
    let dir = tempdir().unwrap();
    let config = config_for(addr).with_output_dir(dir.path());

    let grid = GeoGrid::new(config.bbox(), config.grid_rows(), config.grid_cols()).unwrap();
    let store = CheckpointStore::new(config.grid_path(), config.dataset_path());
    let mut state = store.load(&grid).unwrap();
    let places = Arc::new(YelpClient::new(&config, "test-key".to_string()).unwrap());

    let mut harvester =
        Harvester::from_config(&config, places, Arc::new(HarvestMetrics::new())).unwrap();
    let outcome = harvester.run(&mut state).await.unwrap();

    assert_eq!(outcome.exit_code(), EXIT_QUOTA_EXCEEDED);
    assert!(!store.load(&grid).unwrap().cells[0].done);
    assert!(config.backup_path().exists());
    // One search + four details made it through before the 429
    assert_eq!(read_records(&config.dataset_path()).unwrap().len(), 4);
}
