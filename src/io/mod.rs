//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `places` - Places provider client (search + detail)
//! - `checkpoint` - Grid checkpoint file (resumable progress)
//! - `dataset` - Master CSV dataset (append-only)
//! - `snapshot` - JSON recovery snapshots of raw responses
//! - `coverage` - GeoJSON export of the grid and search circles
//! - `mock_places` - Local HTTP stand-in for the provider

pub mod checkpoint;
pub mod coverage;
pub mod dataset;
pub mod mock_places;
pub mod places;
pub mod snapshot;

// Re-export commonly used types
pub use checkpoint::CheckpointStore;
pub use dataset::DatasetWriter;
pub use places::{PlacesApi, PlacesError, SearchQuery, YelpClient};
pub use snapshot::{SnapshotKind, SnapshotWriter};
