//! Harvest counters and periodic reporting
//!
//! Counters are atomics so the guard, harvester and reporter can share one
//! `Arc<HarvestMetrics>` without locks.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only; do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Remote call classification for per-call counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Search,
    Detail,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Search => "search",
            CallKind::Detail => "detail",
        }
    }
}

/// Counters for one harvest run
pub struct HarvestMetrics {
    search_calls: AtomicU64,
    detail_calls: AtomicU64,
    call_failures: AtomicU64,
    quota_hits: AtomicU64,
    records_written: AtomicU64,
    duplicates_skipped: AtomicU64,
    details_missed: AtomicU64,
    cells_completed: AtomicU64,
    cells_skipped: AtomicU64,
    cells_aborted: AtomicU64,
    /// Sum of remote call latency in milliseconds
    call_latency_sum_ms: AtomicU64,
    call_latency_max_ms: AtomicU64,
    started_at: Instant,
}

impl Default for HarvestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HarvestMetrics {
    pub fn new() -> Self {
        Self {
            search_calls: AtomicU64::new(0),
            detail_calls: AtomicU64::new(0),
            call_failures: AtomicU64::new(0),
            quota_hits: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            details_missed: AtomicU64::new(0),
            cells_completed: AtomicU64::new(0),
            cells_skipped: AtomicU64::new(0),
            cells_aborted: AtomicU64::new(0),
            call_latency_sum_ms: AtomicU64::new(0),
            call_latency_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_call(&self, kind: CallKind, latency_ms: u64) {
        match kind {
            CallKind::Search => self.search_calls.fetch_add(1, Ordering::Relaxed),
            CallKind::Detail => self.detail_calls.fetch_add(1, Ordering::Relaxed),
        };
        self.call_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.call_latency_max_ms.fetch_max(latency_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_call_failure(&self) {
        self.call_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_quota_hit(&self) {
        self.quota_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missed(&self, count: u64) {
        self.details_missed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cell_completed(&self) {
        self.cells_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cell_skipped(&self) {
        self.cells_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cell_aborted(&self) {
        self.cells_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn cells_completed(&self) -> u64 {
        self.cells_completed.load(Ordering::Relaxed)
    }

    /// Snapshot all counters (monotonic, nothing is reset)
    pub fn report(&self) -> HarvestSummary {
        let search_calls = self.search_calls.load(Ordering::Relaxed);
        let detail_calls = self.detail_calls.load(Ordering::Relaxed);
        let total_calls = search_calls + detail_calls;
        let latency_sum = self.call_latency_sum_ms.load(Ordering::Relaxed);

        HarvestSummary {
            search_calls,
            detail_calls,
            call_failures: self.call_failures.load(Ordering::Relaxed),
            quota_hits: self.quota_hits.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            details_missed: self.details_missed.load(Ordering::Relaxed),
            cells_completed: self.cells_completed.load(Ordering::Relaxed),
            cells_skipped: self.cells_skipped.load(Ordering::Relaxed),
            cells_aborted: self.cells_aborted.load(Ordering::Relaxed),
            avg_call_latency_ms: if total_calls > 0 { latency_sum / total_calls } else { 0 },
            max_call_latency_ms: self.call_latency_max_ms.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSummary {
    pub search_calls: u64,
    pub detail_calls: u64,
    pub call_failures: u64,
    pub quota_hits: u64,
    pub records_written: u64,
    pub duplicates_skipped: u64,
    pub details_missed: u64,
    pub cells_completed: u64,
    pub cells_skipped: u64,
    pub cells_aborted: u64,
    pub avg_call_latency_ms: u64,
    pub max_call_latency_ms: u64,
    pub elapsed_secs: f64,
}

impl HarvestSummary {
    /// Share of search hits that were already in the dataset
    pub fn duplicate_rate(&self) -> f64 {
        let seen = self.records_written + self.duplicates_skipped;
        if seen == 0 {
            0.0
        } else {
            self.duplicates_skipped as f64 / seen as f64
        }
    }

    pub fn log(&self) {
        info!(
            cells_completed = %self.cells_completed,
            cells_skipped = %self.cells_skipped,
            cells_aborted = %self.cells_aborted,
            search_calls = %self.search_calls,
            detail_calls = %self.detail_calls,
            call_failures = %self.call_failures,
            quota_hits = %self.quota_hits,
            records_written = %self.records_written,
            duplicates = %self.duplicates_skipped,
            duplicate_rate = format!("{:.1}%", self.duplicate_rate() * 100.0),
            missed = %self.details_missed,
            avg_latency_ms = %self.avg_call_latency_ms,
            max_latency_ms = %self.max_call_latency_ms,
            elapsed_secs = format!("{:.1}", self.elapsed_secs),
            "harvest_metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = HarvestMetrics::new();
        let summary = metrics.report();
        assert_eq!(summary.search_calls, 0);
        assert_eq!(summary.records_written, 0);
        assert_eq!(summary.avg_call_latency_ms, 0);
    }

    #[test]
    fn test_record_calls_and_latency() {
        let metrics = HarvestMetrics::new();
        metrics.record_call(CallKind::Search, 100);
        metrics.record_call(CallKind::Detail, 300);
        metrics.record_call(CallKind::Detail, 200);

        let summary = metrics.report();
        assert_eq!(summary.search_calls, 1);
        assert_eq!(summary.detail_calls, 2);
        assert_eq!(summary.avg_call_latency_ms, 200);
        assert_eq!(summary.max_call_latency_ms, 300);
    }

    #[test]
    fn test_report_does_not_reset() {
        let metrics = HarvestMetrics::new();
        metrics.record_written();
        metrics.record_cell_completed();
        assert_eq!(metrics.report().records_written, 1);
        assert_eq!(metrics.report().records_written, 1);
        assert_eq!(metrics.cells_completed(), 1);
    }

    #[test]
    fn test_duplicate_rate() {
        let metrics = HarvestMetrics::new();
        metrics.record_written();
        metrics.record_written();
        metrics.record_written();
        metrics.record_duplicate();
        let rate = metrics.report().duplicate_rate();
        assert!((rate - 0.25).abs() < 1e-9);
    }
}
