//! GeoJSON export of the grid and its search circles
//!
//! Rendering is left to whatever map tool reads the file. Circles are drawn
//! with the same equirectangular approximation the radius is computed with.

use crate::domain::types::{BoundingBox, Coordinate, GridCell, METERS_PER_DEGREE};
use crate::io::checkpoint::write_atomic;
use crate::services::grid::meters_to_lat_degrees;
use anyhow::Context;
use serde_json::{json, Value};
use std::f64::consts::TAU;
use std::path::Path;
use tracing::info;

/// Vertices used to approximate each search circle
pub const CIRCLE_VERTICES: usize = 64;

/// GeoJSON positions are `[lng, lat]`
fn position(c: Coordinate) -> Value {
    json!([c.lng, c.lat])
}

/// Closed ring through the given points
fn ring(points: impl IntoIterator<Item = Coordinate>) -> Vec<Value> {
    let mut ring: Vec<Value> = points.into_iter().map(position).collect();
    if let Some(first) = ring.first().cloned() {
        ring.push(first);
    }
    ring
}

/// Circle of `radius_m` around `center` as a polygon ring
pub fn circle_ring(center: Coordinate, radius_m: f64) -> Vec<Coordinate> {
    let dlat = meters_to_lat_degrees(radius_m);
    let cos_lat = center.lat.to_radians().cos().max(1e-9);
    let dlng = radius_m / (METERS_PER_DEGREE * cos_lat);

    (0..CIRCLE_VERTICES)
        .map(|i| {
            let theta = TAU * i as f64 / CIRCLE_VERTICES as f64;
            Coordinate::new(center.lat + dlat * theta.sin(), center.lng + dlng * theta.cos())
        })
        .collect()
}

/// Build the FeatureCollection for a grid table
pub fn feature_collection(bbox: &BoundingBox, cells: &[GridCell]) -> Value {
    let mut features = Vec::with_capacity(cells.len() * 2 + 1);

    let outline = [
        Coordinate::new(bbox.south, bbox.west),
        Coordinate::new(bbox.south, bbox.east),
        Coordinate::new(bbox.north, bbox.east),
        Coordinate::new(bbox.north, bbox.west),
    ];
    features.push(json!({
        "type": "Feature",
        "properties": { "kind": "bbox" },
        "geometry": { "type": "Polygon", "coordinates": [ring(outline)] }
    }));

    for cell in cells {
        let cell_id = cell.id.to_string();
        features.push(json!({
            "type": "Feature",
            "properties": {
                "kind": "cell",
                "cell_id": cell_id,
                "done": cell.done,
                "radius_m": cell.radius_m
            },
            "geometry": { "type": "Polygon", "coordinates": [ring(cell.corners())] }
        }));
        features.push(json!({
            "type": "Feature",
            "properties": {
                "kind": "search_circle",
                "cell_id": cell_id,
                "center": [cell.center.lng, cell.center.lat],
                "radius_m": cell.radius_m
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [ring(circle_ring(cell.center, cell.radius_m as f64))]
            }
        }));
    }

    json!({ "type": "FeatureCollection", "features": features })
}

/// Write the coverage file
pub fn write_coverage(path: &Path, bbox: &BoundingBox, cells: &[GridCell]) -> anyhow::Result<()> {
    let collection = feature_collection(bbox, cells);
    let bytes = serde_json::to_vec(&collection)?;
    write_atomic(path, &bytes)
        .with_context(|| format!("Failed to write coverage file {}", path.display()))?;

    info!(path = %path.display(), cells = %cells.len(), "coverage_written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::grid::GeoGrid;

    #[test]
    fn test_feature_counts() {
        let bbox = BoundingBox::new(39.0, 38.0, -76.0, -77.0);
        let cells = GeoGrid::new(bbox, 2, 3).unwrap().generate();
        let fc = feature_collection(&bbox, &cells);

        let features = fc["features"].as_array().unwrap();
        assert_eq!(features.len(), 1 + 2 * 6);
        assert_eq!(fc["type"], "FeatureCollection");
        assert_eq!(features[1]["properties"]["cell_id"], "0_0");
        assert_eq!(features[1]["properties"]["done"], false);
    }

    #[test]
    fn test_rings_are_closed() {
        let bbox = BoundingBox::new(39.0, 38.0, -76.0, -77.0);
        let cells = GeoGrid::new(bbox, 1, 1).unwrap().generate();
        let fc = feature_collection(&bbox, &cells);

        for feature in fc["features"].as_array().unwrap() {
            let ring = feature["geometry"]["coordinates"][0].as_array().unwrap();
            assert_eq!(ring.first(), ring.last());
        }
        let circle = fc["features"][2]["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(circle.len(), CIRCLE_VERTICES + 1);
    }

    #[test]
    fn test_circle_reaches_cell_corners() {
        let bbox = BoundingBox::maryland();
        let cells = GeoGrid::new(bbox, 10, 10).unwrap().generate();
        let cell = &cells[0];
        let ring = circle_ring(cell.center, cell.radius_m as f64);

        // Northernmost vertex lies above the cell's north edge
        let max_lat = ring.iter().map(|c| c.lat).fold(f64::MIN, f64::max);
        let max_lng = ring.iter().map(|c| c.lng).fold(f64::MIN, f64::max);
        assert!(max_lat > cell.north);
        assert!(max_lng > cell.east);
    }
}
