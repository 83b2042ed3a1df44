//! Durable queue of pending observation writes.
//!
//! Scouts record observations while disconnected. Each write is captured as a
//! [`PendingOperation`] and appended to a [`QueueStore`], which keeps it until
//! the remote store confirms it (or until it is abandoned after exhausting its
//! retry budget).
//!
//! # Modules
//!
//! - `operation`: the queued write, its kind and client-generated id
//! - `store`: the `QueueStore` trait, limits and attempt outcomes
//! - `file_store`: journal-backed store that survives restarts
//! - `memory_store`: in-memory store for tests and ephemeral sessions
//! - `error`: error types for the queue
//!
//! # Example
//!
//! ```
//! use offline_queue::{MemoryQueueStore, PendingOperation, QueueStore};
//! use serde_json::json;
//!
//! let queue = MemoryQueueStore::new();
//! let id = queue
//!     .enqueue(PendingOperation::create_observation(json!({ "player_id": "p-17" })))
//!     .unwrap();
//!
//! // Peek: the entry stays queued until the remote store confirms it.
//! let next = queue.dequeue_next().unwrap().unwrap();
//! assert_eq!(next.id, id);
//! queue.remove(&id).unwrap();
//! assert!(queue.is_empty().unwrap());
//! ```

pub mod error;
pub mod file_store;
pub mod memory_store;
pub mod operation;
mod state;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use file_store::FileQueueStore;
pub use memory_store::MemoryQueueStore;
pub use operation::{AttemptFailure, EntryStatus, OperationId, OperationKind, PendingOperation};
pub use state::QueueRecord;
pub use store::{AttemptOutcome, QueueConfig, QueueCounts, QueueStore, DEFAULT_CAPACITY, DEFAULT_MAX_ATTEMPTS};
