//! Master dataset - append-only CSV of unique businesses
//!
//! One row per business id. The header is written when the file is new or
//! empty; every row is flushed before the writer returns so a crash never
//! loses a record that was reported as written.
//!
//! A crash mid-write can still leave a last row without its newline. That
//! row was never reported as written, so it is cut off before the file is
//! read or appended to.

use crate::domain::business::BusinessRecord;
use crate::domain::types::KnownIds;
use anyhow::{bail, Context};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Appending writer for the master dataset
pub struct DatasetWriter {
    file_path: PathBuf,
    writer: csv::Writer<File>,
}

impl DatasetWriter {
    pub fn open(file_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let file_path = file_path.into();

        // Create parent directories if they don't exist
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        repair_torn_tail(&file_path)?;
        let needs_header = fs::metadata(&file_path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .with_context(|| format!("Failed to open dataset {}", file_path.display()))?;

        let writer = csv::WriterBuilder::new().has_headers(needs_header).from_writer(file);

        info!(file_path = %file_path.display(), new_file = %needs_header, "dataset_opened");
        Ok(Self { file_path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append one record and flush it to the file
    pub fn append(&mut self, record: &BusinessRecord) -> anyhow::Result<()> {
        self.writer
            .serialize(record)
            .with_context(|| format!("Failed to append to dataset {}", self.file_path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush dataset {}", self.file_path.display()))?;

        debug!(id = %record.id, cell = %record.cell_id, "record_appended");
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush().context("Failed to flush dataset")
    }
}

/// Truncate the file back to its last complete line. Returns the number of
/// bytes dropped; a missing file is left alone.
pub fn repair_torn_tail(path: &Path) -> anyhow::Result<u64> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open dataset {}", path.display()))
        }
    };

    let len = file.metadata()?.len();
    let keep = complete_prefix_len(&mut file, len)
        .with_context(|| format!("Failed to scan dataset {}", path.display()))?;
    if keep == len {
        return Ok(0);
    }

    file.set_len(keep)
        .with_context(|| format!("Failed to truncate dataset {}", path.display()))?;
    file.sync_all()?;

    let dropped = len - keep;
    warn!(file_path = %path.display(), dropped_bytes = %dropped, "dataset_torn_row_truncated");
    Ok(dropped)
}

/// Length of the file up to and including its last newline
fn complete_prefix_len(file: &mut File, len: u64) -> io::Result<u64> {
    let mut buf = [0u8; 4096];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

fn flexible_reader(path: &Path) -> anyhow::Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))
}

/// Distinct business ids already in the dataset; empty if the file is absent.
/// Short rows are tolerated and only lose their own id.
pub fn read_known_ids(path: &Path) -> anyhow::Result<KnownIds> {
    if !path.exists() || fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false) {
        return Ok(KnownIds::new());
    }

    let mut reader = flexible_reader(path)?;
    let headers = reader.headers()?.clone();
    let Some(id_column) = headers.iter().position(|h| h == "id") else {
        bail!("Dataset {} has no id column", path.display());
    };

    let mut ids = KnownIds::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| {
            format!("Malformed dataset {} at record {}", path.display(), line + 1)
        })?;
        if let Some(id) = record.get(id_column).filter(|id| !id.is_empty()) {
            ids.insert(id);
        }
    }
    Ok(ids)
}

/// Every record in the dataset, for reporting. Rows that do not parse are
/// skipped with a warning.
pub fn read_records(path: &Path) -> anyhow::Result<Vec<BusinessRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = flexible_reader(path)?;
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line, row) in reader.deserialize::<BusinessRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                debug!(record = %(line + 1), error = %e, "dataset_row_unreadable");
            }
        }
    }

    if skipped > 0 {
        warn!(file_path = %path.display(), skipped = %skipped, "dataset_rows_skipped");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str) -> BusinessRecord {
        BusinessRecord {
            cell_id: "0_0".to_string(),
            id: id.to_string(),
            name: format!("Place {id}"),
            rating: Some(4.5),
            review_count: Some(12),
            price: "$$".to_string(),
            categories: "Pizza; Italian".to_string(),
            address: "1 Main St, Baltimore, MD 21201".to_string(),
            city: "Baltimore".to_string(),
            state: "MD".to_string(),
            zip_code: "21201".to_string(),
            latitude: Some(39.29),
            longitude: Some(-76.61),
            phone: "+14105550100".to_string(),
            url: "https://example.test/biz".to_string(),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");

        let mut writer = DatasetWriter::open(&path).unwrap();
        writer.append(&record("a")).unwrap();
        drop(writer);

        let mut writer = DatasetWriter::open(&path).unwrap();
        writer.append(&record("b")).unwrap();
        drop(writer);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "cell_id,id,name,rating,review_count,price,categories,address,city,state,zip_code,latitude,longitude,phone,url"
        );
        assert!(lines[1].starts_with("0_0,a,Place a,4.5,12,$$"));
    }

    #[test]
    fn test_round_trip_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");

        let mut writer = DatasetWriter::open(&path).unwrap();
        writer.append(&record("a")).unwrap();
        writer.append(&record("b")).unwrap();
        drop(writer);

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![record("a"), record("b")]);

        let ids = read_known_ids(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a"));
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out").join("dataset.csv");
        let mut writer = DatasetWriter::open(&path).unwrap();
        writer.append(&record("a")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_missing_dataset_is_empty() {
        let dir = tempdir().unwrap();
        let ids = read_known_ids(&dir.path().join("absent.csv")).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn test_duplicate_rows_collapse_to_one_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, "cell_id,id,name\n0_0,a,A\n0_1,a,A\n1_0,c,C\n").unwrap();
        assert_eq!(read_known_ids(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_id_column_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, "cell_id,name\n0_0,A\n").unwrap();
        assert!(read_known_ids(&path).is_err());
    }

    const HEADER: &str = "cell_id,id,name,rating,review_count,price,categories,address,city,state,zip_code,latitude,longitude,phone,url";

    #[test]
    fn test_torn_last_row_is_cut_before_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, format!("{HEADER}\n0_0,a,A,4.0,3,$,,,,,,,,,\n0_0,b,Bee")).unwrap();

        let mut writer = DatasetWriter::open(&path).unwrap();
        writer.append(&record("c")).unwrap();
        drop(writer);

        let ids: Vec<String> = read_records(&path).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        let known = read_known_ids(&path).unwrap();
        assert_eq!(known.len(), 2);
        assert!(!known.contains("b"));
    }

    #[test]
    fn test_torn_header_is_rewritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, "cell_id,id,na").unwrap();

        assert_eq!(repair_torn_tail(&path).unwrap(), 13);
        let mut writer = DatasetWriter::open(&path).unwrap();
        writer.append(&record("a")).unwrap();
        drop(writer);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next().unwrap(), HEADER);
        assert_eq!(read_records(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_complete_file_is_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, "cell_id,id,name\n0_0,a,A\n").unwrap();
        assert_eq!(repair_torn_tail(&path).unwrap(), 0);
        assert_eq!(repair_torn_tail(&dir.path().join("absent.csv")).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "cell_id,id,name\n0_0,a,A\n");
    }

    #[test]
    fn test_short_row_only_loses_its_own_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, "cell_id,id,name\n0_0,a,A\n0_1\n1_0,c,C\n").unwrap();

        let ids = read_known_ids(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a") && ids.contains("c"));
    }

    #[test]
    fn test_unreadable_rows_are_skipped_in_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        fs::write(&path, format!("{HEADER}\n0_0,a,A,4.0,12.0,$,,,,,,,,,\n0_1\n")).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].review_count, Some(12));
    }
}
