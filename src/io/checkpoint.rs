//! Grid checkpoint persistence
//!
//! The grid file is the checkpoint: one CSV row per cell with its geometry
//! and a `done` flag. It is rewritten as a whole on every flag flip, via a
//! temporary sibling file renamed over the target, so a crash leaves either
//! the previous table or the new one.

use crate::domain::types::{CellId, Coordinate, GridCell, HarvestState};
use crate::io::dataset::{read_known_ids, repair_torn_tail};
use crate::services::grid::GeoGrid;
use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Owns the grid and dataset file locations
pub struct CheckpointStore {
    grid_path: PathBuf,
    dataset_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(grid_path: impl Into<PathBuf>, dataset_path: impl Into<PathBuf>) -> Self {
        Self { grid_path: grid_path.into(), dataset_path: dataset_path.into() }
    }

    pub fn grid_path(&self) -> &Path {
        &self.grid_path
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    /// Load the grid table (generating and persisting it on first run) and
    /// rebuild the dedup index from the dataset, dropping a torn last row
    pub fn load(&self, grid: &GeoGrid) -> anyhow::Result<HarvestState> {
        let cells = self.load_cells(grid)?;
        repair_torn_tail(&self.dataset_path)?;
        let known_ids = read_known_ids(&self.dataset_path)?;

        let state = HarvestState { cells, known_ids };
        info!(
            grid = %self.grid_path.display(),
            cells = %state.cells.len(),
            done = %state.done_count(),
            known_ids = %state.known_ids.len(),
            "checkpoint_loaded"
        );
        Ok(state)
    }

    /// Read the persisted grid, or generate and save a fresh one
    pub fn load_cells(&self, grid: &GeoGrid) -> anyhow::Result<Vec<GridCell>> {
        if self.grid_path.exists() {
            let cells = read_grid(&self.grid_path)?;
            if cells.len() != grid.cell_count() {
                warn!(
                    persisted = %cells.len(),
                    configured = %grid.cell_count(),
                    "grid_size_mismatch_using_persisted"
                );
            }
            return Ok(cells);
        }

        let cells = grid.generate();
        self.save(&cells)?;
        info!(
            grid = %self.grid_path.display(),
            rows = %grid.rows(),
            cols = %grid.cols(),
            "grid_generated"
        );
        Ok(cells)
    }

    /// Flip a cell's done flag and persist the whole table
    pub fn mark_done(&self, cells: &mut [GridCell], index: usize) -> anyhow::Result<()> {
        let Some(cell) = cells.get_mut(index) else {
            bail!("cell index {index} out of range ({} cells)", cells.len());
        };
        cell.done = true;
        let id = cell.id;

        if let Err(e) = self.save(cells) {
            // Memory must not run ahead of disk
            cells[index].done = false;
            return Err(e);
        }

        debug!(cell = %id, "cell_marked_done");
        Ok(())
    }

    /// Overwrite the grid file with the given table
    pub fn save(&self, cells: &[GridCell]) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for cell in cells {
            writer.serialize(GridCellRow::from(cell))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to finish grid CSV buffer")?;

        write_atomic(&self.grid_path, &bytes)
            .with_context(|| format!("Failed to write grid file {}", self.grid_path.display()))
    }
}

/// Parse a grid file. Any malformed row is a fatal error.
pub fn read_grid(path: &Path) -> anyhow::Result<Vec<GridCell>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open grid file {}", path.display()))?;

    let mut cells = Vec::new();
    for (line, row) in reader.deserialize::<GridCellRow>().enumerate() {
        let row = row.with_context(|| {
            format!("Malformed grid file {} at record {}", path.display(), line + 1)
        })?;
        cells.push(row.into_cell().with_context(|| {
            format!("Malformed grid file {} at record {}", path.display(), line + 1)
        })?);
    }

    if cells.is_empty() {
        bail!("Grid file {} has no cells", path.display());
    }
    Ok(cells)
}

/// Write to `path.tmp` then rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

/// On-disk shape of a grid cell
#[derive(Debug, Serialize, Deserialize)]
struct GridCellRow {
    cell_id: String,
    row: u32,
    col: u32,
    south_lat: f64,
    north_lat: f64,
    west_lng: f64,
    east_lng: f64,
    center_lat: f64,
    center_lng: f64,
    search_radius_m: u32,
    #[serde(serialize_with = "ser_yes_no", deserialize_with = "de_yes_no")]
    done: bool,
}

impl From<&GridCell> for GridCellRow {
    fn from(cell: &GridCell) -> Self {
        Self {
            cell_id: cell.id.to_string(),
            row: cell.id.row,
            col: cell.id.col,
            south_lat: cell.south,
            north_lat: cell.north,
            west_lng: cell.west,
            east_lng: cell.east,
            center_lat: cell.center.lat,
            center_lng: cell.center.lng,
            search_radius_m: cell.radius_m,
            done: cell.done,
        }
    }
}

impl GridCellRow {
    fn into_cell(self) -> anyhow::Result<GridCell> {
        let id = CellId::new(self.row, self.col);
        if CellId::parse(&self.cell_id) != Some(id) {
            bail!("cell_id {:?} does not match row {} col {}", self.cell_id, self.row, self.col);
        }
        if self.north_lat <= self.south_lat || self.east_lng <= self.west_lng {
            bail!("cell {} has inverted edges", self.cell_id);
        }

        Ok(GridCell {
            id,
            south: self.south_lat,
            north: self.north_lat,
            west: self.west_lng,
            east: self.east_lng,
            center: Coordinate::new(self.center_lat, self.center_lng),
            radius_m: self.search_radius_m,
            done: self.done,
        })
    }
}

fn ser_yes_no<S: Serializer>(done: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if *done { "yes" } else { "no" })
}

fn de_yes_no<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(d)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid done flag {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BoundingBox;
    use tempfile::tempdir;

    fn grid() -> GeoGrid {
        GeoGrid::new(BoundingBox::new(39.0, 38.0, -76.0, -77.0), 2, 2).unwrap()
    }

    fn store(dir: &Path) -> CheckpointStore {
        CheckpointStore::new(dir.join("grid.csv"), dir.join("dataset.csv"))
    }

    #[test]
    fn test_first_load_generates_and_persists() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let state = store.load(&grid()).unwrap();
        assert_eq!(state.cells.len(), 4);
        assert_eq!(state.done_count(), 0);
        assert!(state.known_ids.is_empty());
        assert!(store.grid_path().exists());

        let content = fs::read_to_string(store.grid_path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "cell_id,row,col,south_lat,north_lat,west_lng,east_lng,center_lat,center_lng,search_radius_m,done"
        );
        assert!(lines.next().unwrap().starts_with("0_0,0,0,38.0,38.5,-77.0,-76.5,38.25,-76.75,40000,no"));
    }

    #[test]
    fn test_mark_done_survives_reload() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut state = store.load(&grid()).unwrap();

        store.mark_done(&mut state.cells, 1).unwrap();

        let reloaded = store.load(&grid()).unwrap();
        assert!(!reloaded.cells[0].done);
        assert!(reloaded.cells[1].done);
        assert_eq!(reloaded.next_pending().unwrap().id, CellId::new(0, 0));
        assert_eq!(reloaded.cells, state.cells);
        assert!(!dir.path().join("grid.csv.tmp").exists());
    }

    #[test]
    fn test_persisted_grid_wins_over_config() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.load(&grid()).unwrap();

        let bigger = GeoGrid::new(BoundingBox::maryland(), 5, 5).unwrap();
        let state = store.load(&bigger).unwrap();
        assert_eq!(state.cells.len(), 4);
    }

    #[test]
    fn test_mark_done_out_of_range() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut state = store.load(&grid()).unwrap();
        assert!(store.mark_done(&mut state.cells, 10).is_err());
    }

    #[test]
    fn test_accepts_true_false_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        fs::write(
            &path,
            "cell_id,row,col,south_lat,north_lat,west_lng,east_lng,center_lat,center_lng,search_radius_m,done\n\
             0_0,0,0,38.0,38.5,-77.0,-76.5,38.25,-76.75,40000,True\n\
             0_1,0,1,38.0,38.5,-76.5,-76.0,38.25,-76.25,40000,false\n",
        )
        .unwrap();

        let cells = read_grid(&path).unwrap();
        assert!(cells[0].done);
        assert!(!cells[1].done);
    }

    #[test]
    fn test_malformed_grid_is_fatal() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.grid_path(), "cell_id,row\nnot,a,grid\n").unwrap();
        assert!(store.load(&grid()).is_err());
    }

    #[test]
    fn test_bad_done_flag_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        fs::write(
            &path,
            "cell_id,row,col,south_lat,north_lat,west_lng,east_lng,center_lat,center_lng,search_radius_m,done\n\
             0_0,0,0,38.0,38.5,-77.0,-76.5,38.25,-76.75,40000,maybe\n",
        )
        .unwrap();
        assert!(read_grid(&path).is_err());
    }

    #[test]
    fn test_loads_known_ids_from_dataset() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::write(
            store.dataset_path(),
            "cell_id,id,name,rating,review_count,price,categories,address,city,state,zip_code,latitude,longitude,phone,url\n\
             0_0,a,A,4.0,10,$,Pizza,1 Main St,Baltimore,MD,21201,39.3,-76.6,,\n\
             0_1,b,B,,,,,,,,,,,,\n",
        )
        .unwrap();

        let state = store.load(&grid()).unwrap();
        assert_eq!(state.known_ids.len(), 2);
        assert!(state.known_ids.contains("a"));
        assert!(state.known_ids.contains("b"));
    }

    #[test]
    fn test_torn_dataset_row_does_not_block_startup() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::write(
            store.dataset_path(),
            "cell_id,id,name,rating,review_count,price,categories,address,city,state,zip_code,latitude,longitude,phone,url\n\
             0_0,a,A,4.0,10,$,Pizza,1 Main St,Baltimore,MD,21201,39.3,-76.6,,\n\
             0_0,b,Bee",
        )
        .unwrap();

        let state = store.load(&grid()).unwrap();
        assert_eq!(state.known_ids.len(), 1);
        assert!(state.known_ids.contains("a"));
        assert!(!state.known_ids.contains("b"));
        assert!(fs::read_to_string(store.dataset_path()).unwrap().ends_with("39.3,-76.6,,\n"));
    }
}
