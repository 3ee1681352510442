//! Bounded-concurrency admission with a priority-ordered pending set.
//!
//! Callers suspend in [`AdmissionController::acquire`] until a slot frees.
//! Each release hands the slot to the highest-priority, oldest waiter;
//! waiters age one level per `aging_threshold` so low-priority work is
//! never pending forever while capacity keeps freeing.

mod controller;
mod error;
mod pending;
mod slot;


pub use controller::{AdmissionController, AdmissionStats};
pub use error::AdmissionError;
pub use pending::PendingView;
pub use slot::{ReleaseOnDrop, ReleaseOutcome, SharedSlot, Slot, SlotGuard, SlotId};
