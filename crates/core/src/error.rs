use std::time::Duration;

use thiserror::Error;

/// The single error surface callers of the pipeline see. Admission,
/// routing, and processing failures all arrive through this type.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The caller (or the pipeline shutting down) cancelled the request
    /// before a result was delivered.
    #[error("request cancelled")]
    Cancelled,

    /// The per-item deadline expired.
    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    /// The payload is malformed or unsupported. Never worth retrying.
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// The pending-set ceiling was reached.
    #[error("admission queue full ({limit} requests pending)")]
    ResourceExhausted { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An admission or routing invariant was violated. Indicates a bug in
    /// the pipeline itself rather than in the payload.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessingError {
    /// Whether resubmitting the same payload can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProcessingError::DecodeFailure(_))
    }

    /// Short stable label used in metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Cancelled => "cancelled",
            ProcessingError::Timeout(_) => "timeout",
            ProcessingError::DecodeFailure(_) => "decode_failure",
            ProcessingError::ResourceExhausted { .. } => "resource_exhausted",
            ProcessingError::Io(_) => "io",
            ProcessingError::Internal(_) => "internal",
        }
    }
}

/// A priority name [`crate::PriorityLevel`] does not recognise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown priority '{0}', expected one of: background, utility, userInitiated, userInteractive")]
pub struct ParsePriorityError(pub String);

/// Errors raised while loading or validating [`crate::PipelineConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
