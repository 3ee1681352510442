use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use clipdeck_core::{PriorityLevel, ProcessingError, RequestId};
use tokio::sync::oneshot;
use tokio::time::Instant;

pub type JobId = u64;

/// The unit of work a context executes. Anything it captures (notably the
/// admission slot guard) is dropped when the job finishes, is skipped, or
/// is withdrawn.
pub type Work = Box<dyn FnOnce() -> Result<Bytes, ProcessingError> + Send + 'static>;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared between a queued job and the caller awaiting it. Exactly one of
/// `try_start` / `try_cancel` wins.
#[derive(Debug)]
pub struct JobControl {
    id: JobId,
    phase: AtomicU8,
}

impl JobControl {
    pub(super) fn new(id: JobId) -> Self {
        Self {
            id,
            phase: AtomicU8::new(QUEUED),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub(super) fn try_start(&self) -> bool {
        self.phase
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark a not-yet-started job cancelled. Fails once it is running.
    pub fn try_cancel(&self) -> bool {
        self.phase
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase.load(Ordering::Acquire) == CANCELLED
    }

    pub fn has_started(&self) -> bool {
        self.phase.load(Ordering::Acquire) == RUNNING
    }
}

pub(super) struct Job {
    pub id: JobId,
    pub request: RequestId,
    /// Priority at dispatch; aging in the queue starts from here.
    pub base: PriorityLevel,
    pub effective: PriorityLevel,
    pub queued_at: Instant,
    pub control: std::sync::Arc<JobControl>,
    pub work: Work,
    pub reply: oneshot::Sender<Result<Bytes, ProcessingError>>,
}
