//! Error types for the sync engine.

use offline_queue::{OperationId, QueueError};
use remote::RemoteError;
use thiserror::Error;

/// Result type alias for sync engine calls.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors returned to callers of the sync engine.
///
/// Drain passes never return these; they record the outcome in a
/// `DrainReport` and in the published status instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local queue failure, including `QueueError::Full`.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Remote capability failure outside a drain pass.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The operation cannot be queued as given.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Manual resolution was requested for an entry that is still active.
    #[error("Operation {0} is not abandoned")]
    NotAbandoned(OperationId),

    /// I/O error on the reference cache file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Reference cache (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether the queue refused the write because it is full.
    pub fn is_capacity(&self) -> bool {
        matches!(self, SyncError::Queue(e) if e.is_capacity())
    }
}
