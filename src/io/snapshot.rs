//! Recovery snapshots of raw provider responses
//!
//! Three rolling files, each fully overwritten on write:
//! - progress: every `every`-th processed cell
//! - backup: once at the end of a run, including quota aborts
//! - emergency: when a run dies on an unexpected error
//!
//! These duplicate what the CSV dataset holds; losing them loses nothing.

use crate::domain::business::BusinessDetails;
use crate::io::checkpoint::write_atomic;
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

/// Which snapshot file an envelope was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Progress,
    Backup,
    Emergency,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Progress => "progress",
            SnapshotKind::Backup => "backup",
            SnapshotKind::Emergency => "emergency",
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    run_id: &'a str,
    kind: SnapshotKind,
    written_at: String,
    count: usize,
    businesses: &'a [BusinessDetails],
}

pub struct SnapshotWriter {
    run_id: String,
    progress_path: PathBuf,
    backup_path: PathBuf,
    emergency_path: PathBuf,
    every: usize,
}

impl SnapshotWriter {
    pub fn new(
        progress_path: impl Into<PathBuf>,
        backup_path: impl Into<PathBuf>,
        emergency_path: impl Into<PathBuf>,
        every: usize,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7().to_string(),
            progress_path: progress_path.into(),
            backup_path: backup_path.into(),
            emergency_path: emergency_path.into(),
            every,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self, kind: SnapshotKind) -> &Path {
        match kind {
            SnapshotKind::Progress => &self.progress_path,
            SnapshotKind::Backup => &self.backup_path,
            SnapshotKind::Emergency => &self.emergency_path,
        }
    }

    /// Write the progress file when `ordinal` (1-based) is a multiple of the
    /// cadence. Returns whether a snapshot was written.
    pub fn maybe_snapshot(
        &self,
        ordinal: usize,
        businesses: &[BusinessDetails],
    ) -> anyhow::Result<bool> {
        if self.every == 0 || ordinal == 0 || ordinal % self.every != 0 {
            return Ok(false);
        }
        self.write(SnapshotKind::Progress, businesses)?;
        Ok(true)
    }

    /// Progress file regardless of cadence
    pub fn progress_snapshot(&self, businesses: &[BusinessDetails]) -> anyhow::Result<()> {
        self.write(SnapshotKind::Progress, businesses)
    }

    pub fn final_snapshot(&self, businesses: &[BusinessDetails]) -> anyhow::Result<()> {
        self.write(SnapshotKind::Backup, businesses)
    }

    pub fn emergency_snapshot(&self, businesses: &[BusinessDetails]) -> anyhow::Result<()> {
        self.write(SnapshotKind::Emergency, businesses)
    }

    fn write(&self, kind: SnapshotKind, businesses: &[BusinessDetails]) -> anyhow::Result<()> {
        let envelope = Envelope {
            run_id: &self.run_id,
            kind,
            written_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
            count: businesses.len(),
            businesses,
        };
        let json = serde_json::to_vec_pretty(&envelope)?;
        let path = self.path(kind);

        write_atomic(path, &json)
            .with_context(|| format!("Failed to write {} snapshot {}", kind.as_str(), path.display()))?;

        info!(
            kind = %kind.as_str(),
            path = %path.display(),
            businesses = %businesses.len(),
            "snapshot_written"
        );
        Ok(())
    }
}
