//! Error types for the offline queue.

use crate::operation::OperationId;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue reached its configured hard cap.
    #[error("Queue is full ({capacity} entries); the action could not be queued")]
    Full { capacity: usize },

    /// An entry with this id is already queued.
    #[error("Operation {0} is already queued")]
    DuplicateId(OperationId),

    /// The referenced entry is not in the queue.
    #[error("Operation not found: {0}")]
    NotFound(OperationId),

    /// The entry is not in the state the call requires.
    #[error("Invalid state for operation {id}: {reason}")]
    InvalidState { id: OperationId, reason: String },

    /// I/O error on the backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error on the backing file.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether this is the capacity error callers must surface to the user.
    pub fn is_capacity(&self) -> bool {
        matches!(self, QueueError::Full { .. })
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
