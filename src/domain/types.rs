//! Shared types for the grid harvester

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Meters per degree of latitude used by the equirectangular approximation
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// WGS84 point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Axis-aligned region to harvest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self { north, south, east, west }
    }

    /// Approximate bounds of the State of Maryland
    pub fn maryland() -> Self {
        Self::new(39.72284, 37.9171, -75.0506, -79.4870)
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn lng_span(&self) -> f64 {
        self.east - self.west
    }

    pub fn is_valid(&self) -> bool {
        self.north > self.south && self.east > self.west
    }
}

/// Newtype for a cell position in the grid, row 0 being the southern-most band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub row: u32,
    pub col: u32,
}

impl CellId {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse the `"{row}_{col}"` form used in the checkpoint and dataset files
    pub fn parse(s: &str) -> Option<Self> {
        let (row, col) = s.split_once('_')?;
        Some(Self { row: row.trim().parse().ok()?, col: col.trim().parse().ok()? })
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.row, self.col)
    }
}

/// One rectangular partition of the bounding box
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub id: CellId,
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
    pub center: Coordinate,
    /// Covering search radius in whole meters
    pub radius_m: u32,
    pub done: bool,
}

impl GridCell {
    /// Corners in SW, SE, NE, NW order
    pub fn corners(&self) -> [Coordinate; 4] {
        [
            Coordinate::new(self.south, self.west),
            Coordinate::new(self.south, self.east),
            Coordinate::new(self.north, self.east),
            Coordinate::new(self.north, self.west),
        ]
    }

    /// Half-height and half-width of the cell in meters
    pub fn half_extents_m(&self) -> (f64, f64) {
        let half_height = (self.north - self.south) / 2.0 * METERS_PER_DEGREE;
        let half_width =
            (self.east - self.west) / 2.0 * METERS_PER_DEGREE * self.center.lat.to_radians().cos();
        (half_height, half_width)
    }

    /// Distance from the center to a corner in meters
    pub fn half_diagonal_m(&self) -> f64 {
        let (h, w) = self.half_extents_m();
        h.hypot(w)
    }
}

/// Dedup index of every business id already in the dataset
#[derive(Debug, Clone, Default)]
pub struct KnownIds(FxHashSet<String>);

impl KnownIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Returns false if the id was already known
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for KnownIds {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Grid table plus the dedup index, threaded through a run
#[derive(Debug, Clone, Default)]
pub struct HarvestState {
    pub cells: Vec<GridCell>,
    pub known_ids: KnownIds,
}

impl HarvestState {
    pub fn done_count(&self) -> usize {
        self.cells.iter().filter(|c| c.done).count()
    }

    /// First cell in row-major order that still needs harvesting
    pub fn next_pending(&self) -> Option<&GridCell> {
        self.cells.iter().find(|c| !c.done)
    }

    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(|c| c.done)
    }
}
