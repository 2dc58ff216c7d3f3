//! Domain models - grid geometry and business records
//!
//! This module contains the canonical data types used throughout the system:
//! - `GridCell` - one rectangular partition of the harvested region
//! - `HarvestState` - the grid table plus the dedup index for a run
//! - `BusinessDetails` - raw provider payload for one business
//! - `BusinessRecord` - flattened row of the master dataset

pub mod business;
pub mod types;

// Re-export commonly used types at module level
pub use business::{BusinessDetails, BusinessRecord, BusinessSummary, SearchPage};
pub use types::{BoundingBox, CellId, Coordinate, GridCell, HarvestState, KnownIds};
