use clipdeck_core::ProcessingError;
use thiserror::Error;

/// Why [`AdmissionController::acquire`](super::AdmissionController::acquire) gave up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The caller cancelled while pending.
    #[error("cancelled while waiting for admission")]
    Cancelled,

    /// The pending-set ceiling was reached.
    #[error("pending set full ({limit} requests waiting)")]
    ResourceExhausted { limit: usize },

    /// The controller was closed (pipeline shutdown).
    #[error("admission controller closed")]
    Closed,
}

impl From<AdmissionError> for ProcessingError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Cancelled | AdmissionError::Closed => ProcessingError::Cancelled,
            AdmissionError::ResourceExhausted { limit } => {
                ProcessingError::ResourceExhausted { limit }
            }
        }
    }
}
