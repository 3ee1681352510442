use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use clipdeck_core::{LoadRequest, ProcessingError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::ResultCache;

/// Caller-supplied transform run on a context's worker thread.
///
/// Implementations must not block on the async runtime; they already run
/// off it.
pub trait Processor: Send + Sync + 'static {
    /// Label used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn process(&self, payload: &[u8]) -> Result<Bytes, ProcessingError>;
}

impl<F> Processor for F
where
    F: Fn(&[u8]) -> Result<Bytes, ProcessingError> + Send + Sync + 'static,
{
    fn process(&self, payload: &[u8]) -> Result<Bytes, ProcessingError> {
        self(payload)
    }
}

/// Execution counters for the processing step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub succeeded: u64,
    /// Failures by [`ProcessingError::kind`].
    pub failed: BTreeMap<&'static str, u64>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Rolling mean over every run, successful or not.
    pub avg_duration: Duration,
    pub last_run: Option<DateTime<Utc>>,
}

impl WorkerStats {
    pub fn runs(&self) -> u64 {
        self.succeeded + self.failed.values().sum::<u64>()
    }

    fn record_execution(&mut self, duration: Duration) {
        self.last_run = Some(Utc::now());
        let count = self.runs();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_duration = if count <= 1 {
            duration
        } else {
            let prev_nanos = self.avg_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }
}

/// Runs the processor for one admitted request and stores successful
/// results in the cache.
pub struct ProcessingWorker {
    processor: Arc<dyn Processor>,
    cache: Option<Arc<ResultCache>>,
    stats: Mutex<WorkerStats>,
}

impl ProcessingWorker {
    pub fn new(processor: Arc<dyn Processor>, cache: Option<Arc<ResultCache>>) -> Self {
        Self {
            processor,
            cache,
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    pub fn processor_name(&self) -> &str {
        self.processor.name()
    }

    fn lock(&self) -> MutexGuard<'_, WorkerStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn run(&self, request: &LoadRequest) -> Result<Bytes, ProcessingError> {
        let started = Instant::now();
        let outcome = self.processor.process(&request.payload);
        let elapsed = started.elapsed();

        {
            let mut stats = self.lock();
            stats.bytes_in += request.payload_len() as u64;
            match &outcome {
                Ok(out) => {
                    stats.succeeded += 1;
                    stats.bytes_out += out.len() as u64;
                }
                Err(e) => *stats.failed.entry(e.kind()).or_default() += 1,
            }
            stats.record_execution(elapsed);
        }

        match &outcome {
            Ok(out) => {
                debug!(
                    request = %request.id,
                    processor = self.processor.name(),
                    bytes_in = request.payload_len(),
                    bytes_out = out.len(),
                    ?elapsed,
                    "payload processed"
                );
                if let (Some(cache), Some(fingerprint)) = (&self.cache, request.fingerprint) {
                    cache.put(fingerprint, out.clone());
                }
            }
            Err(e) => warn!(
                request = %request.id,
                processor = self.processor.name(),
                error = %e,
                permanent = e.is_permanent(),
                "processing failed"
            ),
        }
        outcome
    }

    pub fn stats(&self) -> WorkerStats {
        self.lock().clone()
    }
}
