//! Rate-limit guard - classifies the outcome of every remote call
//!
//! The guard does not throttle ahead of time; the provider enforces its own
//! limits. It only turns a quota signal into a value the harvester must stop
//! on, records call metrics, and optionally spaces calls by a fixed delay.

use crate::infra::metrics::{CallKind, HarvestMetrics};
use crate::io::places::PlacesError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Outcome of a guarded call
#[derive(Debug)]
pub enum Guarded<T> {
    Ok(T),
    /// Provider refused for quota; the run must checkpoint and stop
    QuotaExceeded(PlacesError),
    /// Any other failure; the caller decides whether to skip or abort
    Failed(PlacesError),
}

impl<T> Guarded<T> {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Guarded::QuotaExceeded(_))
    }
}

pub struct RateLimitGuard {
    metrics: Arc<HarvestMetrics>,
    request_delay: Duration,
}

impl RateLimitGuard {
    pub fn new(metrics: Arc<HarvestMetrics>, request_delay: Duration) -> Self {
        Self { metrics, request_delay }
    }

    /// Await `call` and classify its result
    pub async fn call<T, F>(&self, kind: CallKind, call: F) -> Guarded<T>
    where
        F: Future<Output = Result<T, PlacesError>>,
    {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let start = Instant::now();
        let result = call.await;
        self.metrics.record_call(kind, start.elapsed().as_millis() as u64);

        match result {
            Ok(value) => Guarded::Ok(value),
            Err(e) if e.is_quota_exceeded() => {
                self.metrics.record_quota_hit();
                error!(call = %kind.as_str(), error = %e, "quota_exceeded");
                Guarded::QuotaExceeded(e)
            }
            Err(e) => {
                self.metrics.record_call_failure();
                warn!(call = %kind.as_str(), kind = %e.kind(), error = %e, "remote_call_failed");
                Guarded::Failed(e)
            }
        }
    }
}
