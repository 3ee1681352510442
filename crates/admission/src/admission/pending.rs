use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use clipdeck_core::{PriorityLevel, RequestId};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::slot::Slot;

/// Ordering key: highest effective priority first, then arrival order.
type PendingKey = (Reverse<PriorityLevel>, u64);

/// A suspended `acquire` call.
pub(super) struct Waiter {
    pub request: RequestId,
    pub base: PriorityLevel,
    pub effective: PriorityLevel,
    pub enqueued_at: Instant,
    pub grant: oneshot::Sender<Slot>,
}

/// Read-only view of one waiter, for metrics and tests.
#[derive(Debug, Clone, Serialize)]
pub struct PendingView {
    pub request: RequestId,
    pub base: PriorityLevel,
    pub effective: PriorityLevel,
    pub waited: Duration,
}

/// Waiting requests ordered by (effective priority desc, arrival asc).
#[derive(Default)]
pub(super) struct PendingSet {
    entries: BTreeMap<PendingKey, Waiter>,
    /// seq -> current effective priority, to find an entry by seq.
    index: HashMap<u64, PriorityLevel>,
}

impl PendingSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, seq: u64, waiter: Waiter) {
        self.index.insert(seq, waiter.effective);
        self.entries.insert((Reverse(waiter.effective), seq), waiter);
    }

    pub fn remove(&mut self, seq: u64) -> Option<Waiter> {
        let effective = self.index.remove(&seq)?;
        self.entries.remove(&(Reverse(effective), seq))
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.index.contains_key(&seq)
    }

    /// Take the highest-priority, oldest waiter.
    pub fn pop_next(&mut self) -> Option<Waiter> {
        let ((_, seq), waiter) = self.entries.pop_first()?;
        self.index.remove(&seq);
        Some(waiter)
    }

    /// Re-rank every waiter whose wait crossed another aging threshold.
    /// Returns `(request, from, to)` for each promotion.
    pub fn promote_aged(
        &mut self,
        now: Instant,
        threshold: Duration,
    ) -> Vec<(RequestId, PriorityLevel, PriorityLevel)> {
        let stale: Vec<(u64, PriorityLevel)> = self
            .entries
            .iter()
            .filter_map(|((Reverse(current), seq), waiter)| {
                let aged = waiter
                    .base
                    .aged(now.saturating_duration_since(waiter.enqueued_at), threshold);
                (aged > *current).then_some((*seq, aged))
            })
            .collect();

        let mut promoted = Vec::with_capacity(stale.len());
        for (seq, aged) in stale {
            if let Some(mut waiter) = self.remove(seq) {
                promoted.push((waiter.request, waiter.effective, aged));
                waiter.effective = aged;
                self.insert(seq, waiter);
            }
        }
        promoted
    }

    /// Waiters in grant order.
    pub fn views(&self, now: Instant) -> Vec<PendingView> {
        self.entries
            .values()
            .map(|w| PendingView {
                request: w.request,
                base: w.base,
                effective: w.effective,
                waited: now.saturating_duration_since(w.enqueued_at),
            })
            .collect()
    }

    /// Waiter count per effective level.
    pub fn counts_by_level(&self) -> BTreeMap<PriorityLevel, usize> {
        let mut counts = BTreeMap::new();
        for (Reverse(level), _) in self.entries.keys() {
            *counts.entry(*level).or_default() += 1;
        }
        counts
    }

    /// Drop every waiter. Their `grant` senders close, waking callers.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.index.clear();
        n
    }
}
