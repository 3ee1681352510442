//! Pipeline configuration: TOML loading, `CLIPDECK_*` environment overrides,
//! and startup validation of the priority → context table.

mod loading;
mod types;
mod validation;


pub use loading::load_dotenv;
pub use types::{CacheConfig, ContextConfig, PipelineConfig};
