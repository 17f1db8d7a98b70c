//! Error types for the root-change watcher.

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, RootsError>;

/// Errors that can occur around the root-change watcher.
///
/// Batch processing itself never fails; these surface from construction,
/// configuration, commits and dependent path updates.
#[derive(Error, Debug)]
pub enum RootsError {
    /// A path could not be turned into a path identifier.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A change referenced an entity that is not in the graph.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The entity graph refused a commit.
    #[error("commit rejected: {0}")]
    CommitRejected(String),

    /// A dependent collaborator failed to store its new path.
    #[error("failed to update dependent path {path}: {reason}")]
    DependentUpdate { path: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The event channel was closed.
    #[error("channel error: event channel closed")]
    ChannelClosed,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
