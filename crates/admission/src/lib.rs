pub mod admission;
pub mod bridge;
pub mod cache;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod router;
pub mod worker;

pub use admission::{
    AdmissionController, AdmissionError, AdmissionStats, PendingView, ReleaseOnDrop,
    ReleaseOutcome, SharedSlot, Slot, SlotGuard,
};
pub use bridge::ContinuationBridge;
pub use cache::{CacheStats, ResultCache};
pub use error::PipelineError;
pub use metrics::PipelineMetrics;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use router::{ContextStats, Dispatched, ExecutionContext, ExecutionContextRouter, RouterStats};
pub use worker::{ProcessingWorker, Processor, WorkerStats};

pub use tokio_util::sync::CancellationToken;
