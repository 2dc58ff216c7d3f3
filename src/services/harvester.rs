//! Harvester - walks the grid and fills the dataset
//!
//! One cell at a time, one page at a time, one detail lookup at a time:
//! 1. Page through the cell's search results (offset 0, +page_size, ...)
//!    until a short page or the offset ceiling
//! 2. Fetch detail for every id not already in the dataset and append it
//! 3. Retry failed detail lookups, then mark the cell done
//!
//! A quota signal at any point stops the run without marking the current
//! cell done. Everything appended so far is already on disk, so the next run
//! re-pages that cell from offset 0 and dedup drops what it already has.

use crate::domain::business::{BusinessDetails, BusinessRecord};
use crate::domain::types::{CellId, GridCell, HarvestState, KnownIds};
use crate::infra::config::Config;
use crate::infra::metrics::{CallKind, HarvestMetrics};
use crate::io::checkpoint::CheckpointStore;
use crate::io::dataset::{read_records, DatasetWriter};
use crate::io::places::{PlacesApi, PlacesError, SearchQuery};
use crate::io::snapshot::SnapshotWriter;
use crate::services::grid::GeoGrid;
use crate::services::rate_limit::{Guarded, RateLimitGuard};
use crate::services::summary::DatasetSummary;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Process exit status for a quota abort (EX_TEMPFAIL)
pub const EXIT_QUOTA_EXCEEDED: u8 = 75;

/// Process exit status when the walk ended with cells still pending (EX_UNAVAILABLE)
pub const EXIT_INCOMPLETE: u8 = 69;

/// Harvest loop tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarvestSettings {
    pub page_size: u32,
    pub max_offset: u32,
    pub detail_retry_passes: u32,
    pub request_delay: Duration,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self { page_size: 50, max_offset: 950, detail_retry_passes: 1, request_delay: Duration::ZERO }
    }
}

impl HarvestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.page_size(),
            max_offset: config.max_offset(),
            detail_retry_passes: config.detail_retry_passes(),
            request_delay: config.request_delay(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// Every cell is done
    Completed { cells_processed: usize, records_written: u64 },
    /// Stopped on a quota signal while working on `cell`
    QuotaExceeded { cell: CellId, records_written: u64 },
    /// Walked every cell, but `pending` of them failed a search page
    Incomplete { cells_processed: usize, pending: usize, records_written: u64 },
}

impl HarvestOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            HarvestOutcome::Completed { .. } => 0,
            HarvestOutcome::QuotaExceeded { .. } => EXIT_QUOTA_EXCEEDED,
            HarvestOutcome::Incomplete { .. } => EXIT_INCOMPLETE,
        }
    }
}

/// Result of one cell
#[derive(Debug)]
enum CellResult {
    Complete { written: usize, missed: Vec<String> },
    /// A search page failed; the cell stays pending for the next run
    Aborted,
    QuotaExceeded,
}

/// Result of one detail lookup
enum DetailResult {
    Written,
    Duplicate,
    /// Transient failure, worth another try
    Failed,
    /// Provider no longer knows the id
    Gone,
    QuotaExceeded,
}

pub struct Harvester {
    places: Arc<dyn PlacesApi>,
    guard: RateLimitGuard,
    store: CheckpointStore,
    dataset: DatasetWriter,
    snapshots: SnapshotWriter,
    settings: HarvestSettings,
    metrics: Arc<HarvestMetrics>,
    /// Raw detail payloads gathered this run, for snapshots
    collected: Vec<BusinessDetails>,
}

impl Harvester {
    pub fn new(
        places: Arc<dyn PlacesApi>,
        store: CheckpointStore,
        dataset: DatasetWriter,
        snapshots: SnapshotWriter,
        settings: HarvestSettings,
        metrics: Arc<HarvestMetrics>,
    ) -> Self {
        let guard = RateLimitGuard::new(metrics.clone(), settings.request_delay);
        Self {
            places,
            guard,
            store,
            dataset,
            snapshots,
            settings,
            metrics,
            collected: Vec::new(),
        }
    }

    /// Wire a harvester to the files named in `config`
    pub fn from_config(
        config: &Config,
        places: Arc<dyn PlacesApi>,
        metrics: Arc<HarvestMetrics>,
    ) -> anyhow::Result<Self> {
        let store = CheckpointStore::new(config.grid_path(), config.dataset_path());
        let dataset = DatasetWriter::open(config.dataset_path())?;
        let snapshots = SnapshotWriter::new(
            config.progress_path(),
            config.backup_path(),
            config.emergency_path(),
            config.snapshot_every(),
        );
        Ok(Self::new(places, store, dataset, snapshots, HarvestSettings::from_config(config), metrics))
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn collected(&self) -> &[BusinessDetails] {
        &self.collected
    }

    /// Harvest every pending cell of `state` in row-major order
    pub async fn run(&mut self, state: &mut HarvestState) -> anyhow::Result<HarvestOutcome> {
        info!(
            run_id = %self.snapshots.run_id(),
            cells = %state.cells.len(),
            done = %state.done_count(),
            known_ids = %state.known_ids.len(),
            "harvest_started"
        );

        match self.run_cells(state).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, collected = %self.collected.len(), "harvest_failed");
                if !self.collected.is_empty() {
                    if let Err(dump_err) = self.snapshots.emergency_snapshot(&self.collected) {
                        error!(error = %dump_err, "emergency_snapshot_failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_cells(&mut self, state: &mut HarvestState) -> anyhow::Result<HarvestOutcome> {
        let total = state.cells.len();
        let mut processed = 0usize;

        for index in 0..total {
            let ordinal = index + 1;
            if state.cells[index].done {
                self.metrics.record_cell_skipped();
                debug!(cell = %state.cells[index].id, ordinal = %ordinal, "cell_skipped_done");
                continue;
            }

            let cell = state.cells[index].clone();
            info!(
                cell = %cell.id,
                ordinal = %ordinal,
                total = %total,
                lat = %cell.center.lat,
                lng = %cell.center.lng,
                radius_m = %cell.radius_m,
                "cell_started"
            );

            match self.harvest_cell(&cell, &mut state.known_ids).await? {
                CellResult::Complete { written, missed } => {
                    self.dataset.flush()?;
                    self.store.mark_done(&mut state.cells, index)?;
                    self.metrics.record_cell_completed();
                    processed += 1;

                    if !missed.is_empty() {
                        self.metrics.record_missed(missed.len() as u64);
                        warn!(cell = %cell.id, count = %missed.len(), ids = ?missed, "details_missed");
                    }
                    info!(
                        cell = %cell.id,
                        written = %written,
                        known_ids = %state.known_ids.len(),
                        done = %state.done_count(),
                        total = %total,
                        "cell_completed"
                    );

                    self.maybe_snapshot(ordinal);
                }
                CellResult::Aborted => {
                    self.metrics.record_cell_aborted();
                    warn!(cell = %cell.id, "cell_aborted_will_retry");
                }
                CellResult::QuotaExceeded => {
                    self.metrics.record_cell_aborted();
                    self.dataset.flush()?;
                    self.write_snapshots_on_stop();

                    error!(
                        cell = %cell.id,
                        done = %state.done_count(),
                        total = %total,
                        "harvest_stopped_quota_exceeded"
                    );
                    self.metrics.report().log();
                    return Ok(HarvestOutcome::QuotaExceeded {
                        cell: cell.id,
                        records_written: self.metrics.records_written(),
                    });
                }
            }

            self.metrics.report().log();
        }

        self.dataset.flush()?;
        if let Err(e) = self.snapshots.final_snapshot(&self.collected) {
            warn!(error = %e, "final_snapshot_failed");
        }

        let records_written = self.metrics.records_written();
        let pending = total - state.done_count();
        if pending > 0 {
            warn!(
                cells_processed = %processed,
                records_written = %records_written,
                pending = %pending,
                "harvest_incomplete"
            );
            return Ok(HarvestOutcome::Incomplete {
                cells_processed: processed,
                pending,
                records_written,
            });
        }

        info!(cells_processed = %processed, records_written = %records_written, "harvest_finished");
        Ok(HarvestOutcome::Completed { cells_processed: processed, records_written })
    }

    async fn harvest_cell(
        &mut self,
        cell: &GridCell,
        known_ids: &mut KnownIds,
    ) -> anyhow::Result<CellResult> {
        let page_size = self.settings.page_size;
        let mut seen_in_cell: FxHashSet<String> = FxHashSet::default();
        let mut retry: Vec<String> = Vec::new();
        let mut missed: Vec<String> = Vec::new();
        let mut written = 0usize;
        let mut offset = 0u32;

        loop {
            let query =
                SearchQuery { center: cell.center, radius_m: cell.radius_m, offset, limit: page_size };
            let places = self.places.clone();
            let page = match self.guard.call(CallKind::Search, places.search(&query)).await {
                Guarded::Ok(page) => page,
                Guarded::QuotaExceeded(_) => return Ok(CellResult::QuotaExceeded),
                Guarded::Failed(e) => {
                    warn!(cell = %cell.id, offset = %offset, error = %e, "search_page_failed");
                    return Ok(CellResult::Aborted);
                }
            };

            let returned = page.len();
            debug!(
                cell = %cell.id,
                offset = %offset,
                returned = %returned,
                total = ?page.total,
                "search_page"
            );

            for summary in page.businesses {
                if !seen_in_cell.insert(summary.id.clone()) {
                    continue;
                }
                if known_ids.contains(&summary.id) {
                    self.metrics.record_duplicate();
                    continue;
                }

                match self.fetch_detail(cell.id, &summary.id, known_ids).await? {
                    DetailResult::Written => written += 1,
                    DetailResult::Duplicate => {}
                    DetailResult::Failed => retry.push(summary.id),
                    DetailResult::Gone => missed.push(summary.id),
                    DetailResult::QuotaExceeded => return Ok(CellResult::QuotaExceeded),
                }
            }

            if returned < page_size as usize {
                break;
            }
            offset += page_size;
            if offset > self.settings.max_offset {
                debug!(cell = %cell.id, offset = %offset, "offset_ceiling_reached");
                break;
            }
        }

        for pass in 1..=self.settings.detail_retry_passes {
            if retry.is_empty() {
                break;
            }
            info!(cell = %cell.id, pass = %pass, pending = %retry.len(), "detail_retry_pass");

            for id in std::mem::take(&mut retry) {
                match self.fetch_detail(cell.id, &id, known_ids).await? {
                    DetailResult::Written => written += 1,
                    DetailResult::Duplicate => {}
                    DetailResult::Failed => retry.push(id),
                    DetailResult::Gone => missed.push(id),
                    DetailResult::QuotaExceeded => return Ok(CellResult::QuotaExceeded),
                }
            }
        }
        missed.append(&mut retry);

        Ok(CellResult::Complete { written, missed })
    }

    async fn fetch_detail(
        &mut self,
        cell: CellId,
        id: &str,
        known_ids: &mut KnownIds,
    ) -> anyhow::Result<DetailResult> {
        let places = self.places.clone();
        let details = match self.guard.call(CallKind::Detail, places.business(id)).await {
            Guarded::Ok(details) => details,
            Guarded::QuotaExceeded(_) => return Ok(DetailResult::QuotaExceeded),
            Guarded::Failed(PlacesError::NotFound(_)) => return Ok(DetailResult::Gone),
            Guarded::Failed(_) => return Ok(DetailResult::Failed),
        };

        // Detail may canonicalise to an id we already hold
        if details.id != id && known_ids.contains(&details.id) {
            self.metrics.record_duplicate();
            known_ids.insert(id);
            return Ok(DetailResult::Duplicate);
        }

        let record = BusinessRecord::from_details(cell, &details);
        self.dataset.append(&record)?;
        known_ids.insert(details.id.clone());
        known_ids.insert(id);
        self.metrics.record_written();

        debug!(cell = %cell, id = %record.id, name = %record.name, "business_written");
        self.collected.push(details);
        Ok(DetailResult::Written)
    }

    fn maybe_snapshot(&self, ordinal: usize) {
        if let Err(e) = self.snapshots.maybe_snapshot(ordinal, &self.collected) {
            warn!(error = %e, ordinal = %ordinal, "progress_snapshot_failed");
        }
    }

    /// Progress and final backup on a quota stop
    fn write_snapshots_on_stop(&self) {
        if let Err(e) = self.snapshots.progress_snapshot(&self.collected) {
            warn!(error = %e, "progress_snapshot_failed");
        }
        if let Err(e) = self.snapshots.final_snapshot(&self.collected) {
            warn!(error = %e, "final_snapshot_failed");
        }
    }
}

/// Load the checkpoint named in `config`, harvest every pending cell and log
/// the dataset report. The outcome always survives a failing report.
pub async fn run_harvest(
    config: &Config,
    places: Arc<dyn PlacesApi>,
) -> anyhow::Result<HarvestOutcome> {
    let grid = GeoGrid::new(config.bbox(), config.grid_rows(), config.grid_cols())?;
    let store = CheckpointStore::new(config.grid_path(), config.dataset_path());
    let mut state = store.load(&grid)?;

    if state.is_complete() {
        info!(cells = %state.cells.len(), "all_cells_done_nothing_to_harvest");
        return Ok(HarvestOutcome::Completed { cells_processed: 0, records_written: 0 });
    }

    let metrics = Arc::new(HarvestMetrics::new());
    let mut harvester = Harvester::from_config(config, places, metrics)?;
    let outcome = harvester.run(&mut state).await?;

    match read_records(&config.dataset_path()) {
        Ok(records) => DatasetSummary::from_records(&records).log(),
        Err(e) => warn!(error = %format!("{e:#}"), "dataset_summary_unavailable"),
    }

    info!(
        outcome = ?outcome,
        done = %state.done_count(),
        total = %state.cells.len(),
        exit_code = %outcome.exit_code(),
        "harvest_exit"
    );
    Ok(outcome)
}
