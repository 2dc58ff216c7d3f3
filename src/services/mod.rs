//! Services - harvest logic
//!
//! This module contains the core harvest services:
//! - `grid` - Bounding box partitioning and search radius
//! - `rate_limit` - Quota classification around remote calls
//! - `harvester` - Cell-by-cell harvest loop with checkpointing
//! - `summary` - Dataset statistics

pub mod grid;
pub mod harvester;
pub mod rate_limit;
pub mod summary;

// Re-export commonly used types
pub use grid::GeoGrid;
pub use harvester::{
    run_harvest, HarvestOutcome, HarvestSettings, Harvester, EXIT_INCOMPLETE, EXIT_QUOTA_EXCEEDED,
};
pub use rate_limit::{Guarded, RateLimitGuard};
pub use summary::DatasetSummary;
