//! Suspends a caller until its dispatched job resumes it, exactly once.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clipdeck_core::ProcessingError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::router::{Dispatched, ExecutionContextRouter, JobControl};

/// Connects a suspended caller to the job carrying its work.
///
/// The caller resumes with the job's result, with `Cancelled` if `cancel`
/// fires first, or with `Timeout` once the per-item deadline passes. On
/// either early exit a job that has not started is withdrawn; a running job
/// finishes on its worker and its result is dropped.
pub struct ContinuationBridge {
    router: Arc<ExecutionContextRouter>,
    deadline: Option<Duration>,
}

impl ContinuationBridge {
    pub fn new(router: Arc<ExecutionContextRouter>, deadline: Option<Duration>) -> Self {
        Self { router, deadline }
    }

    /// Per-item deadline, measured from dispatch.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub async fn wait(
        &self,
        dispatched: Dispatched,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ProcessingError> {
        let Dispatched {
            mut result,
            control,
            ..
        } = dispatched;
        let mut pending = WithdrawOnDrop {
            router: &self.router,
            control,
            armed: true,
        };

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job = pending.control.id(), "caller cancelled while awaiting result");
                Err(ProcessingError::Cancelled)
            }
            received = &mut result => {
                pending.armed = false;
                // A dropped sender means the job was withdrawn or drained.
                received.unwrap_or(Err(ProcessingError::Cancelled))
            }
            limit = expired => {
                debug!(job = pending.control.id(), ?limit, "per-item deadline expired");
                Err(ProcessingError::Timeout(limit))
            }
        }
    }
}

/// Withdraws the job if the caller stops waiting before its result lands.
struct WithdrawOnDrop<'a> {
    router: &'a ExecutionContextRouter,
    control: Arc<JobControl>,
    armed: bool,
}

impl Drop for WithdrawOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.router.withdraw(&self.control) {
            debug!(job = self.control.id(), "job withdrawn before start");
        } else {
            debug!(job = self.control.id(), "job already running, result will be discarded");
        }
    }
}
