//! Tracing setup: console plus an optional per-run log file
//!
//! The console follows `RUST_LOG` (default INFO). The file always records
//! this crate at DEBUG, so a run can be reconstructed page by page after
//! the fact.

use anyhow::Context;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::warn;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter for the log file: our events at DEBUG, dependencies at INFO
const FILE_FILTER: &str = "info,grid_harvest=debug";

/// Install the global subscriber. Returns the log file path when one was
/// opened; a log file that cannot be created only costs the file output.
pub fn init_logging(log_dir: Option<&Path>, prefix: &str) -> Option<PathBuf> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_filter(console_filter);

    let opened = log_dir.map(|dir| open_log_file(dir, prefix)).transpose();
    let (file, path, open_err) = match opened {
        Ok(Some((path, file))) => (Some(file), Some(path), None),
        Ok(None) => (None, None, None),
        Err(e) => (None, None, Some(e)),
    };
    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .with_filter(EnvFilter::new(FILE_FILTER))
    });

    tracing_subscriber::registry().with(console).with(file_layer).init();

    if let Some(e) = open_err {
        warn!(error = %format!("{e:#}"), "log_file_unavailable");
    }
    path
}

/// `<prefix>_<YYYYmmdd_HHMMSS>.log`, UTC
pub fn log_file_name(prefix: &str, at: OffsetDateTime) -> anyhow::Result<String> {
    let stamp = at.format(format_description!("[year][month][day]_[hour][minute][second]"))?;
    Ok(format!("{prefix}_{stamp}.log"))
}

fn open_log_file(dir: &Path, prefix: &str) -> anyhow::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = dir.join(log_file_name(prefix, OffsetDateTime::now_utc())?);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    Ok((path, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::datetime;

    #[test]
    fn test_log_file_name() {
        let at = datetime!(2024-03-07 09:05:01 UTC);
        assert_eq!(
            log_file_name("maryland_restaurants", at).unwrap(),
            "maryland_restaurants_20240307_090501.log"
        );
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        let (path, _file) = open_log_file(&logs, "run").unwrap();
        assert!(path.starts_with(&logs));
        assert!(path.exists());
    }
}
