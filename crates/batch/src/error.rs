//! Error types for batch processing

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering, running or submitting batch jobs
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Core(#[from] fcpg_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration in {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Could not serialize configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Missing setting: {0}")]
    MissingSetting(&'static str),

    #[error("Parameter grid discovery failed: {0}")]
    Discovery(String),

    #[error("Could not build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Job submission failed: {0}")]
    Submission(String),
}

/// Result type alias for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;
