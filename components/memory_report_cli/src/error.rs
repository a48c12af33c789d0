//! Error types for the CLI

use std::path::PathBuf;

use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// An input file could not be read
    #[error("could not read '{}': {source}", .path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Heap description or event JSON failed
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Heap description could not be materialized
    #[error("invalid heap description: {0}")]
    Heap(#[from] heap_model::HeapError),

    /// Component configuration is invalid
    #[error(transparent)]
    Configuration(#[from] memory_usage::ConfigurationError),

    /// Collection failed
    #[error(transparent)]
    Traverse(#[from] memory_usage::HeapSnapshotTraverseError),

    /// Report could not be rendered
    #[error(transparent)]
    Report(#[from] memory_usage::ReportError),
}

impl From<std::fmt::Error> for CliError {
    fn from(err: std::fmt::Error) -> Self {
        CliError::Report(err.into())
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
