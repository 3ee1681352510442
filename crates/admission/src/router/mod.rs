//! Table-driven routing of admitted work onto per-tier execution contexts.
//!
//! Every [`PriorityLevel`] maps to exactly one [`ExecutionContext`] whose
//! tier is at least that level. Contexts never share a FIFO across
//! priorities: each orders its own queue by effective priority, and queued
//! work that ages past a tier boundary moves to the context for its new
//! level.

mod context;
mod job;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clipdeck_core::{ConfigError, PipelineConfig, PriorityLevel, ProcessingError, RequestId};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::PipelineError;

pub use context::{ContextStats, ExecutionContext};
pub use job::{JobControl, JobId, Work};

use job::Job;

/// Router-wide counters plus every context's stats, lowest tier first.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub dispatched: u64,
    pub reroutes: u64,
    pub contexts: Vec<ContextStats>,
}

/// A dispatched job: the caller's end of the result channel plus the
/// control block used to withdraw it.
#[derive(Debug)]
pub struct Dispatched {
    pub(crate) result: oneshot::Receiver<Result<Bytes, ProcessingError>>,
    pub(crate) control: Arc<JobControl>,
    context: String,
}

impl Dispatched {
    pub fn job_id(&self) -> JobId {
        self.control.id()
    }

    /// Context the job was first routed to.
    pub fn context(&self) -> &str {
        &self.context
    }
}

pub struct ExecutionContextRouter {
    /// Ordered by tier, lowest first.
    contexts: Vec<Arc<ExecutionContext>>,
    /// `PriorityLevel::rank()` -> index into `contexts`.
    table: [usize; PriorityLevel::ALL.len()],
    aging_threshold: Duration,
    next_job: AtomicU64,
    dispatched: AtomicU64,
    reroutes: AtomicU64,
}

impl ExecutionContextRouter {
    /// Build one context per distinct id in `priority_context_map`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let mut contexts = Vec::new();
        for id in config.context_ids() {
            let levels = config.context_levels(&id);
            let ctx = ExecutionContext::new(&id, levels, config.workers_for(&id))?;
            contexts.push(Arc::new(ctx));
        }

        let mut table = [0usize; PriorityLevel::ALL.len()];
        for level in PriorityLevel::ALL {
            let id = config.context_for(level);
            let index = contexts
                .iter()
                .position(|c| c.id() == id)
                .ok_or_else(|| ConfigError::Invalid(format!("no context built for '{id}'")))?;
            if contexts[index].tier() < level {
                return Err(ConfigError::Invalid(format!(
                    "context '{id}' (tier {}) cannot serve '{level}'",
                    contexts[index].tier()
                ))
                .into());
            }
            table[level.rank()] = index;
        }

        info!(
            contexts = contexts.len(),
            aging_threshold = ?config.aging_threshold(),
            "execution contexts ready"
        );

        Ok(Self {
            contexts,
            table,
            aging_threshold: config.aging_threshold(),
            next_job: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            reroutes: AtomicU64::new(0),
        })
    }

    fn context_for(&self, priority: PriorityLevel) -> &Arc<ExecutionContext> {
        &self.contexts[self.table[priority.rank()]]
    }

    /// Id of the context serving `priority`.
    pub fn route(&self, priority: PriorityLevel) -> &str {
        self.context_for(priority).id()
    }

    pub fn context(&self, id: &str) -> Option<&Arc<ExecutionContext>> {
        self.contexts.iter().find(|c| c.id() == id)
    }

    pub fn contexts(&self) -> &[Arc<ExecutionContext>] {
        &self.contexts
    }

    /// Queue `work` on the context for `priority` and start it if a worker
    /// is free.
    pub fn dispatch(&self, request: RequestId, priority: PriorityLevel, work: Work) -> Dispatched {
        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let control = Arc::new(JobControl::new(id));
        let (reply, result) = oneshot::channel();
        let ctx = self.context_for(priority);

        ctx.enqueue(Job {
            id,
            request,
            base: priority,
            effective: priority,
            queued_at: Instant::now(),
            control: Arc::clone(&control),
            work,
            reply,
        });
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(job = id, request = %request, priority = %priority, context = %ctx.id(), "job dispatched");
        ctx.pump();

        Dispatched {
            result,
            control,
            context: ctx.id().to_string(),
        }
    }

    /// Cancel a job that has not started. Returns `false` if it is already
    /// running or finished; its result will then be discarded by the caller.
    pub fn withdraw(&self, control: &JobControl) -> bool {
        if !control.try_cancel() {
            return false;
        }
        for ctx in &self.contexts {
            if let Some(job) = ctx.withdraw(control.id()) {
                debug!(job = job.id, request = %job.request, context = %ctx.id(), "job withdrawn before start");
                return true;
            }
        }
        // Mid re-route: the destination drops it on arrival.
        true
    }

    /// Promote queued jobs that waited past the aging threshold and move
    /// any whose new level is served by a different context. Returns the
    /// number of jobs moved.
    pub fn promote_aged(&self) -> usize {
        let now = Instant::now();
        let mut moved = 0;
        for ctx in &self.contexts {
            let (moving, _) = ctx.promote_aged(now, self.aging_threshold);
            for job in moving {
                let dest = self.context_for(job.effective);
                debug!(
                    job = job.id,
                    request = %job.request,
                    from = %ctx.id(),
                    to = %dest.id(),
                    priority = %job.effective,
                    "re-routing aged job"
                );
                if let Some(cancelled) = dest.accept_rerouted(job) {
                    debug!(job = cancelled.id, context = %dest.id(), "dropping job cancelled in transit");
                    continue;
                }
                dest.pump();
                moved += 1;
            }
        }
        self.reroutes.fetch_add(moved as u64, Ordering::Relaxed);
        moved
    }

    /// Withdraw every queued job. Their callers resume with `Cancelled`.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        for ctx in &self.contexts {
            drained += ctx.drain().len();
        }
        if drained > 0 {
            debug!(drained, "router drained");
        }
        drained
    }

    pub fn queued(&self) -> usize {
        self.contexts.iter().map(|c| c.queued()).sum()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            reroutes: self.reroutes.load(Ordering::Relaxed),
            contexts: self.contexts.iter().map(|c| c.stats()).collect(),
        }
    }
}
