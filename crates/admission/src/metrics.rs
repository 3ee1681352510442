use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::AdmissionStats;
use crate::cache::CacheStats;
use crate::router::RouterStats;
use crate::worker::WorkerStats;

/// Point-in-time view of the whole pipeline, serializable for logs and the
/// CLI's `--metrics` output.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    pub captured_at: DateTime<Utc>,
    /// Requests passed to `submit`, cache hits included.
    pub submitted: u64,
    /// Requests answered from the cache without admission.
    pub cache_hits: u64,
    pub admission: AdmissionStats,
    pub router: RouterStats,
    pub worker: WorkerStats,
    /// `None` when caching is disabled.
    pub cache: Option<CacheStats>,
}

impl PipelineMetrics {
    /// Jobs waiting in any context queue.
    pub fn queued(&self) -> usize {
        self.router.contexts.iter().map(|c| c.queued).sum()
    }

    /// Cancelled jobs dropped by contexts without running.
    pub fn skipped(&self) -> u64 {
        self.router.contexts.iter().map(|c| c.skipped).sum()
    }

    /// Jobs currently executing across all contexts.
    pub fn running(&self) -> usize {
        self.router.contexts.iter().map(|c| c.running).sum()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            submitted = self.submitted,
            cache_hits = self.cache_hits,
            active = self.admission.active,
            peak_active = self.admission.peak_active,
            granted = self.admission.granted,
            released = self.admission.released,
            promotions = self.admission.promotions,
            reroutes = self.router.reroutes,
            skipped = self.skipped(),
            avg_duration = ?self.worker.avg_duration,
            "pipeline metrics"
        );
    }
}
