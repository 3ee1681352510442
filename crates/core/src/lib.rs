pub mod config;
pub mod error;
pub mod fingerprint;
pub mod priority;
pub mod request;

pub use config::{CacheConfig, ContextConfig, PipelineConfig};
pub use error::*;
pub use fingerprint::Fingerprint;
pub use priority::PriorityLevel;
pub use request::{LoadRequest, RequestId};
