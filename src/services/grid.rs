//! Grid partitioning of the bounding box and per-cell covering radius
//!
//! Cells are produced in row-major order. Row 0 is the southern-most band and
//! column 0 the western-most, so cell `0_0` sits in the south-west corner.

use crate::domain::types::{BoundingBox, CellId, Coordinate, GridCell, METERS_PER_DEGREE};

/// Provider hard limit on the search radius
pub const MAX_RADIUS_M: f64 = 40_000.0;

/// Circle-over-rectangle margin so corners fall inside the search circle
pub const RADIUS_OVERLAP: f64 = 1.2;

/// Grid definition: a bounding box cut into `rows` x `cols` equal cells
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoGrid {
    bbox: BoundingBox,
    rows: u32,
    cols: u32,
}

impl GeoGrid {
    pub fn new(bbox: BoundingBox, rows: u32, cols: u32) -> anyhow::Result<Self> {
        anyhow::ensure!(rows >= 1 && cols >= 1, "grid needs at least 1x1 cells, got {rows}x{cols}");
        anyhow::ensure!(
            bbox.is_valid(),
            "bounding box must have north > south and east > west: {bbox:?}"
        );
        Ok(Self { bbox, rows, cols })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Cell height in degrees of latitude
    pub fn cell_height(&self) -> f64 {
        self.bbox.lat_span() / self.rows as f64
    }

    /// Cell width in degrees of longitude
    pub fn cell_width(&self) -> f64 {
        self.bbox.lng_span() / self.cols as f64
    }

    /// Generate every cell, not done, in row-major order
    pub fn generate(&self) -> Vec<GridCell> {
        let mut cells = Vec::with_capacity(self.cell_count());
        for row in 0..self.rows {
            for col in 0..self.cols {
                cells.push(self.cell(CellId::new(row, col)));
            }
        }
        cells
    }

    /// Build a single cell. Edges on the outer border are snapped to the box
    /// so the union of cells is exactly the box.
    pub fn cell(&self, id: CellId) -> GridCell {
        let south = self.band_edge(self.bbox.south, self.bbox.north, id.row, self.rows);
        let north = self.band_edge(self.bbox.south, self.bbox.north, id.row + 1, self.rows);
        let west = self.band_edge(self.bbox.west, self.bbox.east, id.col, self.cols);
        let east = self.band_edge(self.bbox.west, self.bbox.east, id.col + 1, self.cols);
        let center = Coordinate::new((south + north) / 2.0, (west + east) / 2.0);

        let mut cell = GridCell { id, south, north, west, east, center, radius_m: 0, done: false };
        // Rounded up so the sent radius never falls short of the covering radius
        cell.radius_m = radius(&cell).ceil() as u32;
        cell
    }

    fn band_edge(&self, start: f64, end: f64, index: u32, count: u32) -> f64 {
        if index == 0 {
            start
        } else if index >= count {
            end
        } else {
            start + index as f64 * (end - start) / count as f64
        }
    }
}

/// Covering radius before the provider cap is applied
pub fn covering_radius(cell: &GridCell) -> f64 {
    let (half_height, half_width) = cell.half_extents_m();
    RADIUS_OVERLAP * half_height.hypot(half_width)
}

/// Search radius in meters: covering radius capped at the provider limit.
///
/// Large cells whose covering radius exceeds the cap lose coverage at the
/// corners; the grid is expected to be fine enough that this does not happen.
pub fn radius(cell: &GridCell) -> f64 {
    covering_radius(cell).min(MAX_RADIUS_M)
}

/// Degrees of latitude for a distance in meters, used for coverage drawing
pub fn meters_to_lat_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}
