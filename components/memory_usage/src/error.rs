//! Error types for memory usage collection.

use serde::Serialize;
use thiserror::Error;

/// Outcome of a collection cycle as reported in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// The cycle completed
    NoError,
    /// The traversal was cancelled through its [`CancellationToken`](crate::CancellationToken)
    TraversalAborted,
    /// The DFS stack or the number of enumerated objects exceeded its limit
    ObjectsMapIsTooBig,
    /// Anything else
    Unknown,
}

/// Fatal traversal failure. The cycle produces no report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("heap snapshot traversal failed: {status:?}")]
pub struct HeapSnapshotTraverseError {
    /// Reason the traversal stopped
    pub status: StatusCode,
}

impl HeapSnapshotTraverseError {
    /// Creates an error with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }

    /// The traversal was cancelled.
    pub fn aborted() -> Self {
        Self::new(StatusCode::TraversalAborted)
    }

    /// A structural limit was exceeded.
    pub fn objects_map_is_too_big() -> Self {
        Self::new(StatusCode::ObjectsMapIsTooBig)
    }
}

/// Result type for traversal passes.
pub type TraverseResult<T> = Result<T, HeapSnapshotTraverseError>;

/// Invalid component configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configuration is not valid JSON or has the wrong shape
    #[error("malformed memory usage configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    /// More components than fit in an ownership mask
    #[error("too many components: at most {max} are supported")]
    TooManyComponents {
        /// Limit
        max: usize,
    },

    /// More categories than fit in a category mask
    #[error("too many categories: at most {max} are supported")]
    TooManyCategories {
        /// Limit
        max: usize,
    },

    /// A component refers to a category id that was never registered
    #[error("unknown category id {0}")]
    UnknownCategory(usize),

    /// Registration order and ids disagree
    #[error("{kind} `{label}` has id {id} but is registered at index {index}")]
    InconsistentId {
        /// `component` or `category`
        kind: &'static str,
        /// Label of the offending entry
        label: String,
        /// Stored id
        id: usize,
        /// Position in the registry
        index: usize,
    },
}

/// Failure to build a crash report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    /// The statistics were collected without the extended report
    #[error("extended memory report required for sending a crash report was not calculated")]
    ExtendedReportMissing,

    /// Formatting the report text failed
    #[error("failed to format report")]
    Format(#[from] std::fmt::Error),
}
