use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clipdeck_core::{LoadRequest, PipelineConfig, PriorityLevel, RequestId};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::AdmissionError;
use super::pending::{PendingSet, PendingView, Waiter};
use super::slot::{ReleaseOutcome, Slot, SlotGuard, SlotId};

/// Admission counters exposed through pipeline metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdmissionStats {
    /// Slots currently outstanding.
    pub active: usize,
    /// Highest `active` ever observed.
    pub peak_active: usize,
    /// Waiters per effective priority level.
    pub pending: BTreeMap<PriorityLevel, usize>,
    pub granted: u64,
    pub released: u64,
    pub cancelled_pending: u64,
    pub rejected: u64,
    pub promotions: u64,
    pub double_releases: u64,
}

/// Everything guarded by the controller's single lock.
#[derive(Default)]
struct AdmissionState {
    outstanding: HashMap<SlotId, RequestId>,
    pending: PendingSet,
    next_seq: u64,
    next_slot: SlotId,
    closed: bool,
    stats: AdmissionStats,
}

impl AdmissionState {
    fn grant(&mut self, owner: RequestId, priority: PriorityLevel, now: Instant) -> Slot {
        let id = self.next_slot;
        self.next_slot += 1;
        self.outstanding.insert(id, owner);
        self.stats.granted += 1;
        self.stats.peak_active = self.stats.peak_active.max(self.outstanding.len());
        Slot {
            id,
            owner,
            granted_at: now,
            priority,
        }
    }
}

/// Bounded-concurrency gate. At most `max_concurrent` slots are
/// outstanding; everyone else waits in a priority-ordered pending set.
pub struct AdmissionController {
    max_concurrent: usize,
    max_pending: Option<usize>,
    aging_threshold: Duration,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize, max_pending: Option<usize>, aging_threshold: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            max_pending,
            aging_threshold,
            state: Mutex::new(AdmissionState::default()),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.resolved_max_concurrent(),
            config.max_pending,
            config.aging_threshold(),
        )
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        // A panic while holding the lock cannot leave the state half-written
        // (every mutation is a single insert/remove), so keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for a slot. Suspends the calling task, never a thread.
    ///
    /// Fails with [`AdmissionError::Cancelled`] if `cancel` fires first;
    /// a cancelled waiter never holds a slot.
    pub async fn acquire(
        self: &Arc<Self>,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<SlotGuard, AdmissionError> {
        if cancel.is_cancelled() {
            return Err(AdmissionError::Cancelled);
        }

        let (seq, rx) = {
            let mut state = self.lock();
            if state.closed {
                return Err(AdmissionError::Closed);
            }

            let now = Instant::now();
            // Pending is only non-empty while capacity is exhausted, so an
            // empty set plus spare capacity means nobody is being skipped.
            if state.pending.is_empty() && state.outstanding.len() < self.max_concurrent {
                let slot = state.grant(request.id, request.priority, now);
                debug!(
                    request = %request.id,
                    priority = %request.priority,
                    slot = slot.id,
                    "slot granted immediately"
                );
                return Ok(SlotGuard::new(slot, Arc::clone(self)));
            }

            if let Some(limit) = self.max_pending {
                if state.pending.len() >= limit {
                    state.stats.rejected += 1;
                    warn!(request = %request.id, limit, "pending set full, rejecting request");
                    return Err(AdmissionError::ResourceExhausted { limit });
                }
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                seq,
                Waiter {
                    request: request.id,
                    base: request.priority,
                    effective: request.priority,
                    enqueued_at: now,
                    grant: tx,
                },
            );
            debug!(
                request = %request.id,
                priority = %request.priority,
                pending = state.pending.len(),
                "capacity exhausted, request pending"
            );
            (seq, rx)
        };

        let mut ticket = PendingTicket {
            controller: self.as_ref(),
            seq,
            rx: Some(rx),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            granted = ticket.granted() => {
                let slot = granted?;
                Ok(SlotGuard::new(slot, Arc::clone(self)))
            }
        }
    }

    /// Return a slot. Never fails; releasing a slot that is not outstanding
    /// changes nothing and is reported as [`ReleaseOutcome::AlreadyReleased`].
    pub fn release(&self, slot: &Slot) -> ReleaseOutcome {
        let mut state = self.lock();
        if state.outstanding.remove(&slot.id).is_none() {
            state.stats.double_releases += 1;
            error!(
                slot = slot.id,
                request = %slot.owner,
                "slot released twice; admission invariant violated"
            );
            return ReleaseOutcome::AlreadyReleased;
        }
        state.stats.released += 1;
        debug!(
            slot = slot.id,
            request = %slot.owner,
            held_for = ?slot.granted_at.elapsed(),
            "slot released"
        );
        self.hand_off(&mut state, Instant::now());
        ReleaseOutcome::Released
    }

    /// Grant freed capacity to the best waiters.
    fn hand_off(&self, state: &mut AdmissionState, now: Instant) {
        self.age_locked(state, now);
        while state.outstanding.len() < self.max_concurrent {
            let Some(waiter) = state.pending.pop_next() else {
                break;
            };
            let slot = state.grant(waiter.request, waiter.effective, now);
            let slot_id = slot.id;
            match waiter.grant.send(slot) {
                Ok(()) => debug!(
                    request = %waiter.request,
                    base = %waiter.base,
                    effective = %waiter.effective,
                    slot = slot_id,
                    waited = ?now.saturating_duration_since(waiter.enqueued_at),
                    "slot handed to pending request"
                ),
                Err(slot) => {
                    // The ticket removes itself under this lock before its
                    // receiver goes away, so this should be unreachable.
                    state.outstanding.remove(&slot.id);
                    state.stats.granted -= 1;
                    error!(request = %waiter.request, "pending request vanished before grant");
                }
            }
        }
    }

    fn age_locked(&self, state: &mut AdmissionState, now: Instant) {
        let promoted = state.pending.promote_aged(now, self.aging_threshold);
        state.stats.promotions += promoted.len() as u64;
        for (request, from, to) in promoted {
            debug!(request = %request, from = %from, to = %to, "pending request promoted by aging");
        }
    }

    /// Apply aging to every waiter now. Grants still happen only on release;
    /// this keeps metrics and snapshots current between releases.
    pub fn promote_aged(&self) -> usize {
        let mut state = self.lock();
        let before = state.stats.promotions;
        self.age_locked(&mut state, Instant::now());
        (state.stats.promotions - before) as usize
    }

    /// Waiters in the order they would be granted, aging applied.
    pub fn pending_snapshot(&self) -> Vec<PendingView> {
        let mut state = self.lock();
        let now = Instant::now();
        self.age_locked(&mut state, now);
        state.pending.views(now)
    }

    pub fn active(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn stats(&self) -> AdmissionStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.active = state.outstanding.len();
        stats.pending = state.pending.counts_by_level();
        stats
    }

    /// Refuse new requests and wake every waiter with `Closed`.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.pending.clear();
        state.stats.cancelled_pending += dropped as u64;
        if dropped > 0 {
            debug!(dropped, "admission closed, pending requests cancelled");
        }
    }

    /// Called when a pending ticket is dropped without claiming its grant.
    fn abandon(&self, seq: u64, rx: Option<oneshot::Receiver<Slot>>) {
        let mut state = self.lock();
        if let Some(waiter) = state.pending.remove(seq) {
            state.stats.cancelled_pending += 1;
            debug!(request = %waiter.request, "pending request cancelled");
            return;
        }
        drop(state);

        // Already granted: the slot sits in the channel. Give it back.
        if let Some(mut rx) = rx {
            rx.close();
            if let Ok(slot) = rx.try_recv() {
                debug!(request = %slot.owner, slot = slot.id, "grant raced with cancellation, returning slot");
                self.release(&slot);
            }
        }
    }
}

/// Presence in the pending set. Dropping an unclaimed ticket removes the
/// waiter, or returns the slot if a grant raced with cancellation.
struct PendingTicket<'a> {
    controller: &'a AdmissionController,
    seq: u64,
    rx: Option<oneshot::Receiver<Slot>>,
}

impl PendingTicket<'_> {
    async fn granted(&mut self) -> Result<Slot, AdmissionError> {
        let result = match self.rx.as_mut() {
            Some(rx) => rx.await.map_err(|_| AdmissionError::Closed),
            None => Err(AdmissionError::Closed),
        };
        // Either claimed or the sender is gone; nothing left to abandon.
        self.rx = None;
        if result.is_err() {
            debug_assert!(!self.controller.lock().pending.contains(self.seq));
        }
        result
    }
}

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.controller.abandon(self.seq, Some(rx));
        }
    }
}
