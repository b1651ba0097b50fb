//! Error types for arrival

use std::path::PathBuf;

use thiserror::Error;

/// Crate level error
///
/// Only configuration problems and a crashed run task surface here. Everything
/// that goes wrong while requests are running is recorded as data in the
/// [`RunReport`](crate::report::RunReport) instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The schedule was rejected before the run started
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The run task panicked or was cancelled by the runtime
    #[error("run task failed: {0}")]
    Run(#[from] tokio::task::JoinError),
}

/// Configuration validation and loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Rate or time unit is not a positive, finite value
    #[error("invalid rate: {0}")]
    InvalidRate(String),

    /// Run duration is zero
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// Worker pool bounds make no sense
    #[error("invalid worker pool: {0}")]
    InvalidPool(String),

    /// Request or drain timeout is zero
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    /// The config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config document is not valid
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
