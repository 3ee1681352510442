use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use clipdeck_core::{PriorityLevel, RequestId};
use tokio::time::Instant;

use super::controller::AdmissionController;

pub type SlotId = u64;

/// A granted concurrency permit. Not `Clone`: exactly one
/// owner exists between grant and release.
#[derive(Debug)]
pub struct Slot {
    pub(super) id: SlotId,
    pub(super) owner: RequestId,
    pub(super) granted_at: Instant,
    pub(super) priority: PriorityLevel,
}

impl Slot {
    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn owner(&self) -> RequestId {
        self.owner
    }

    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }

    /// Effective priority at the moment of grant (after any aging).
    pub fn priority(&self) -> PriorityLevel {
        self.priority
    }
}

/// Result of [`AdmissionController::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The slot was not outstanding. Capacity is untouched; the event is
    /// logged and counted as a double release.
    AlreadyReleased,
}

/// Scoped permit: releases its slot exactly once when dropped, including
/// during unwinding.
pub struct SlotGuard {
    slot: Option<Slot>,
    controller: Arc<AdmissionController>,
}

impl SlotGuard {
    pub(super) fn new(slot: Slot, controller: Arc<AdmissionController>) -> Self {
        Self {
            slot: Some(slot),
            controller,
        }
    }

    pub fn slot(&self) -> &Slot {
        // Only `release` and `drop` take the slot, and both consume the guard.
        self.slot.as_ref().unwrap_or_else(|| unreachable!("slot guard already released"))
    }

    /// Release now instead of at drop.
    pub fn release(mut self) -> ReleaseOutcome {
        match self.slot.take() {
            Some(slot) => self.controller.release(&slot),
            None => ReleaseOutcome::AlreadyReleased,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.controller.release(&slot);
        }
    }
}

impl fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard").field("slot", &self.slot).finish()
    }
}

/// A [`SlotGuard`] reachable from both a job and the caller awaiting it.
///
/// Whichever side releases first frees the slot and the other finds it gone.
/// Dropping every handle without releasing drops the guard, which releases.
#[derive(Clone)]
pub struct SharedSlot {
    guard: Arc<Mutex<Option<SlotGuard>>>,
}

impl SharedSlot {
    pub fn new(guard: SlotGuard) -> Self {
        Self {
            guard: Arc::new(Mutex::new(Some(guard))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<SlotGuard>> {
        self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Release now if still held. Returns `true` only for the call that
    /// freed the slot.
    pub fn release(&self) -> bool {
        // Taken under the lock, released after it: release may grant a waiter.
        let taken = self.lock().take();
        match taken {
            Some(guard) => guard.release() == ReleaseOutcome::Released,
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.lock().is_some()
    }

    /// Handle that releases the slot when dropped, whether the job holding
    /// it ran to completion, unwound, or was dropped unrun.
    pub fn release_on_drop(&self) -> ReleaseOnDrop {
        ReleaseOnDrop(self.clone())
    }
}

impl fmt::Debug for SharedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSlot").field("held", &self.is_held()).finish()
    }
}

/// See [`SharedSlot::release_on_drop`].
#[derive(Debug)]
pub struct ReleaseOnDrop(SharedSlot);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}
