use std::any::Any;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clipdeck_core::{PriorityLevel, ProcessingError};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error};

use super::job::{Job, JobId};

/// Queue order: highest effective priority first, then dispatch order.
type QueueKey = (Reverse<PriorityLevel>, JobId);

/// Per-context counters.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub id: String,
    pub tier: PriorityLevel,
    pub levels: Vec<PriorityLevel>,
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Cancelled before start and dropped without running.
    pub skipped: u64,
    pub rerouted_in: u64,
    pub rerouted_out: u64,
}

#[derive(Default)]
struct ContextState {
    queue: BTreeMap<QueueKey, Job>,
    running: usize,
    completed: u64,
    failed: u64,
    panicked: u64,
    skipped: u64,
    rerouted_in: u64,
    rerouted_out: u64,
}

impl ContextState {
    fn insert(&mut self, job: Job) {
        self.queue.insert((Reverse(job.effective), job.id), job);
    }
}

/// A worker environment dedicated to one tier. Owns its queue and a
/// `rayon` pool of `workers` threads; at most `workers` jobs are handed to
/// the pool at once, so ordering is decided here rather than by rayon.
pub struct ExecutionContext {
    id: String,
    tier: PriorityLevel,
    levels: Vec<PriorityLevel>,
    workers: usize,
    pool: rayon::ThreadPool,
    state: Mutex<ContextState>,
}

impl ExecutionContext {
    pub(super) fn new(
        id: &str,
        levels: Vec<PriorityLevel>,
        workers: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let tier = levels.iter().copied().max().unwrap_or(PriorityLevel::Background);
        let thread_prefix = format!("clipdeck-{id}");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(move |i| format!("{thread_prefix}-{i}"))
            .build()?;
        Ok(Self {
            id: id.to_string(),
            tier,
            levels,
            workers: workers.max(1),
            pool,
            state: Mutex::new(ContextState::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Minimum guaranteed priority: the highest level this context serves.
    pub fn tier(&self) -> PriorityLevel {
        self.tier
    }

    pub fn serves(&self, level: PriorityLevel) -> bool {
        self.levels.contains(&level)
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn enqueue(&self, job: Job) {
        self.lock().insert(job);
    }

    /// Queue a job moved here by aging. A job cancelled while in transit is
    /// not queued; it is handed back so the caller drops it outside the lock.
    pub(super) fn accept_rerouted(&self, job: Job) -> Option<Job> {
        let mut state = self.lock();
        if job.control.is_cancelled() {
            state.skipped += 1;
            return Some(job);
        }
        state.rerouted_in += 1;
        state.insert(job);
        None
    }

    /// Hand queued jobs to the pool while workers are free.
    pub(super) fn pump(self: &Arc<Self>) {
        let mut skipped = Vec::new();
        loop {
            let next = {
                let mut state = self.lock();
                let mut picked = None;
                while state.running < self.workers {
                    let Some((_, job)) = state.queue.pop_first() else {
                        break;
                    };
                    if job.control.try_start() {
                        state.running += 1;
                        picked = Some(job);
                        break;
                    }
                    state.skipped += 1;
                    skipped.push(job);
                }
                picked
            };
            let Some(job) = next else {
                break;
            };
            let ctx = Arc::clone(self);
            self.pool.spawn(move || ctx.execute(job));
        }

        // Dropped outside the lock: a job's captures may release a slot.
        for job in skipped {
            debug!(context = %self.id, job = job.id, request = %job.request, "skipping cancelled job");
        }
    }

    fn execute(self: Arc<Self>, job: Job) {
        let Job {
            id,
            request,
            base,
            effective,
            queued_at,
            work,
            reply,
            ..
        } = job;
        debug!(
            context = %self.id,
            job = id,
            request = %request,
            base = %base,
            effective = %effective,
            waited = ?queued_at.elapsed(),
            "job started"
        );

        let (result, panicked) = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(result) => (result, false),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(context = %self.id, job = id, request = %request, panic = %message, "processing step panicked");
                (
                    Err(ProcessingError::Internal(format!("processing step panicked: {message}"))),
                    true,
                )
            }
        };

        {
            let mut state = self.lock();
            state.running -= 1;
            match (&result, panicked) {
                (Ok(_), _) => state.completed += 1,
                (Err(_), true) => state.panicked += 1,
                (Err(_), false) => state.failed += 1,
            }
        }

        if reply.send(result).is_err() {
            debug!(context = %self.id, job = id, request = %request, "caller gone, result discarded");
        }
        self.pump();
    }

    /// Remove a queued job by id.
    pub(super) fn withdraw(&self, id: JobId) -> Option<Job> {
        let mut state = self.lock();
        let key = state.queue.keys().find(|(_, job_id)| *job_id == id).copied()?;
        let job = state.queue.remove(&key)?;
        state.skipped += 1;
        Some(job)
    }

    /// Re-rank queued jobs that crossed another aging threshold. Jobs whose
    /// new level belongs to another context are removed and returned;
    /// cancelled leftovers are purged. Returns `(moving, promoted_in_place)`.
    pub(super) fn promote_aged(
        &self,
        now: Instant,
        threshold: Duration,
    ) -> (Vec<Job>, usize) {
        let mut purged = Vec::new();
        let mut moving = Vec::new();
        let mut in_place = 0;
        {
            let mut state = self.lock();
            let stale: Vec<(QueueKey, PriorityLevel)> = state
                .queue
                .iter()
                .filter_map(|(key, job)| {
                    if job.control.is_cancelled() {
                        return Some((*key, job.effective));
                    }
                    let aged = job
                        .base
                        .aged(now.saturating_duration_since(job.queued_at), threshold);
                    (aged > job.effective).then_some((*key, aged))
                })
                .collect();

            for (key, aged) in stale {
                let Some(mut job) = state.queue.remove(&key) else {
                    continue;
                };
                if job.control.is_cancelled() {
                    state.skipped += 1;
                    purged.push(job);
                    continue;
                }
                debug!(
                    context = %self.id,
                    job = job.id,
                    request = %job.request,
                    from = %job.effective,
                    to = %aged,
                    "queued job promoted by aging"
                );
                job.effective = aged;
                if self.serves(aged) {
                    in_place += 1;
                    state.insert(job);
                } else {
                    state.rerouted_out += 1;
                    moving.push(job);
                }
            }
        }
        drop(purged);
        (moving, in_place)
    }

    /// Empty the queue, cancelling everything in it.
    pub(super) fn drain(&self) -> Vec<Job> {
        let mut state = self.lock();
        let drained: Vec<Job> = std::mem::take(&mut state.queue).into_values().collect();
        for job in &drained {
            job.control.try_cancel();
        }
        state.skipped += drained.len() as u64;
        drained
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn stats(&self) -> ContextStats {
        let state = self.lock();
        ContextStats {
            id: self.id.clone(),
            tier: self.tier,
            levels: self.levels.clone(),
            workers: self.workers,
            queued: state.queue.len(),
            running: state.running,
            completed: state.completed,
            failed: state.failed,
            panicked: state.panicked,
            skipped: state.skipped,
            rerouted_in: state.rerouted_in,
            rerouted_out: state.rerouted_out,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
