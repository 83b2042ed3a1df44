//! In-memory bindings of the remote capabilities.
//!
//! These evaluate every query predicate locally and support fault injection,
//! so the sync engine and the migration utility can be exercised without a
//! network.

mod records;
mod storage;

pub use records::{MemoryRecordStore, RecordCall, RecordMethod};
pub use storage::MemoryObjectStorage;
