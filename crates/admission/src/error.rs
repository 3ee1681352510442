use clipdeck_core::ConfigError;
use thiserror::Error;

/// Errors raised while assembling a pipeline. Request-level failures use
/// [`clipdeck_core::ProcessingError`] instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("no processor configured")]
    MissingProcessor,

    #[error("pipeline must be built inside a Tokio runtime")]
    NoRuntime,
}
