use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::priority::PriorityLevel;

/// Opaque identifier of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One admission attempt. Immutable once built; lives until the caller's
/// continuation resumes.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub id: RequestId,
    pub priority: PriorityLevel,
    pub submitted_at: Instant,
    pub payload: Bytes,
    pub fingerprint: Option<Fingerprint>,
}

impl LoadRequest {
    pub fn new(payload: impl Into<Bytes>, priority: PriorityLevel) -> Self {
        Self {
            id: RequestId::new(),
            priority,
            submitted_at: Instant::now(),
            payload: payload.into(),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
