//! The pipeline handle: owns admission, routing, the cache, and the aging
//! ticker, and exposes `submit` to any number of concurrent callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use clipdeck_core::{Fingerprint, LoadRequest, PipelineConfig, PriorityLevel, ProcessingError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission::{AdmissionController, PendingView, SharedSlot};
use crate::bridge::ContinuationBridge;
use crate::cache::ResultCache;
use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::router::{ExecutionContextRouter, Work};
use crate::worker::{ProcessingWorker, Processor};

// ── Builder ──────────────────────────────────────────────────────────

/// Fluent builder for a [`Pipeline`].
///
/// # Example
/// ```ignore
/// let pipeline = Pipeline::builder(PipelineConfig::from_file("clipdeck.toml")?)
///     .processor(ImageProbe)
///     .build()?;
/// let out = pipeline.submit(bytes, PriorityLevel::UserInteractive, None).await?;
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    processor: Option<Arc<dyn Processor>>,
}

impl PipelineBuilder {
    pub fn processor(mut self, processor: impl Processor) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    /// Validate the config, start one worker pool per context, and spawn the
    /// aging ticker. Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let processor = self.processor.ok_or(PipelineError::MissingProcessor)?;
        let config = self.config;
        config.validate()?;

        let admission = Arc::new(AdmissionController::from_config(&config));
        let router = Arc::new(ExecutionContextRouter::from_config(&config)?);
        let cache = ResultCache::from_config(&config.cache).map(Arc::new);
        let worker = Arc::new(ProcessingWorker::new(processor, cache.clone()));
        let bridge = ContinuationBridge::new(Arc::clone(&router), config.per_item_timeout());
        let shutdown = CancellationToken::new();

        runtime.spawn(aging_ticker(
            Arc::clone(&admission),
            Arc::clone(&router),
            config.aging_tick(),
            shutdown.clone(),
        ));

        info!(
            max_concurrent = admission.max_concurrent(),
            contexts = router.contexts().len(),
            processor = worker.processor_name(),
            cache = cache.is_some(),
            "pipeline started"
        );

        Ok(Pipeline {
            config,
            admission,
            router,
            bridge,
            worker,
            cache,
            shutdown,
            submitted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        })
    }
}

/// Periodically applies aging: refreshes pending priorities and moves queued
/// jobs that crossed into another context's tier.
async fn aging_ticker(
    admission: Arc<AdmissionController>,
    router: Arc<ExecutionContextRouter>,
    period: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let promoted = admission.promote_aged();
                let moved = router.promote_aged();
                if promoted > 0 || moved > 0 {
                    debug!(promoted, moved, "aging tick");
                }
            }
        }
    }
    debug!("aging ticker stopped");
}

// ── Pipeline ─────────────────────────────────────────────────────────

pub struct Pipeline {
    config: PipelineConfig,
    admission: Arc<AdmissionController>,
    router: Arc<ExecutionContextRouter>,
    bridge: ContinuationBridge,
    worker: Arc<ProcessingWorker>,
    cache: Option<Arc<ResultCache>>,
    shutdown: CancellationToken,
    submitted: AtomicU64,
    cache_hits: AtomicU64,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            processor: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `payload` at `priority`. With a fingerprint, a cached result
    /// is returned without waiting for admission.
    pub async fn submit(
        &self,
        payload: impl Into<Bytes>,
        priority: PriorityLevel,
        fingerprint: Option<Fingerprint>,
    ) -> Result<Bytes, ProcessingError> {
        self.submit_with_cancel(payload, priority, fingerprint, &CancellationToken::new())
            .await
    }

    /// Like [`Pipeline::submit`], resuming with `Cancelled` once `cancel` fires.
    pub async fn submit_with_cancel(
        &self,
        payload: impl Into<Bytes>,
        priority: PriorityLevel,
        fingerprint: Option<Fingerprint>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProcessingError> {
        let request = LoadRequest::new(payload, priority).with_fingerprint(fingerprint);
        self.process(request, cancel).await
    }

    pub async fn process(
        &self,
        request: LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProcessingError> {
        self.submitted.fetch_add(1, Ordering::Relaxed);

        if let (Some(cache), Some(fingerprint)) = (&self.cache, request.fingerprint) {
            if let Some(hit) = cache.get(&fingerprint) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(request = %request.id, fingerprint = %fingerprint.short(), "served from cache");
                return Ok(hit);
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ProcessingError::Cancelled),
            result = self.admit_and_run(&request, cancel) => result,
        };
        if let Err(e) = &outcome {
            debug!(
                request = %request.id,
                priority = %request.priority,
                error = %e,
                waited = ?request.submitted_at.elapsed(),
                "request failed"
            );
        }
        outcome
    }

    async fn admit_and_run(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProcessingError> {
        let guard = self.admission.acquire(request, cancel).await?;
        // Route by the priority the slot was granted at, aging included.
        let priority = guard.slot().priority();
        let slot = SharedSlot::new(guard);

        let worker = Arc::clone(&self.worker);
        let job_request = request.clone();
        let held = slot.release_on_drop();
        let work: Work = Box::new(move || {
            // Held until the job finishes; dropping the job unrun releases it too.
            let _held = held;
            worker.run(&job_request)
        });

        let dispatched = self.router.dispatch(request.id, priority, work);
        let outcome = self.bridge.wait(dispatched, cancel).await;
        if let Err(ProcessingError::Timeout(limit)) = &outcome {
            // The step may still be running; its slot goes back now.
            if slot.release() {
                debug!(request = %request.id, ?limit, "slot released at deadline");
            }
        }
        outcome
    }

    /// Waiters in grant order.
    pub fn pending(&self) -> Vec<PendingView> {
        self.admission.pending_snapshot()
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn router(&self) -> &ExecutionContextRouter {
        &self.router
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_deref()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            captured_at: Utc::now(),
            submitted: self.submitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            admission: self.admission.stats(),
            router: self.router.stats(),
            worker: self.worker.stats(),
            cache: self.cache.as_ref().map(|c| c.stats()),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the aging ticker, refuse new work, and resume every waiting
    /// caller with `Cancelled`. Jobs already running finish on their
    /// workers. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.admission.close();
        let drained = self.router.drain();
        info!(drained, "pipeline shut down");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
