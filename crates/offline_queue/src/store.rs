//! Queue storage abstraction.
//!
//! This module defines the `QueueStore` trait that every backend implements.
//! The trait methods take `&self`; implementations serialize access with
//! internal locking so the enqueue path and the drain path can share one
//! store through an `Arc` without mutating storage outside this interface.

use crate::error::QueueResult;
use crate::operation::{AttemptFailure, OperationId, PendingOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default hard cap on stored entries.
pub const DEFAULT_CAPACITY: usize = 500;

/// Default number of permanent-failure attempts before an entry is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Queue limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of stored entries, abandoned ones included.
    pub capacity: usize,
    /// Attempts after which a permanently failing entry is abandoned.
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl QueueConfig {
    /// Set the capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The entry stays queued for a later pass.
    Retrying { attempts: u32 },
    /// The entry exhausted its budget and is held for manual resolution.
    Abandoned { attempts: u32 },
}

impl AttemptOutcome {
    pub fn is_abandoned(&self) -> bool {
        matches!(self, AttemptOutcome::Abandoned { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            AttemptOutcome::Retrying { attempts } | AttemptOutcome::Abandoned { attempts } => {
                *attempts
            }
        }
    }
}

/// Entry counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Every stored entry.
    pub total: usize,
    /// Entries still eligible for submission.
    pub active: usize,
    /// Entries held for manual resolution.
    pub abandoned: usize,
}

/// Trait for queue storage backends.
///
/// # Delivery
///
/// `dequeue_next` only peeks: the entry stays stored until `remove` is
/// called after the remote store confirms it. A crash in between leaves the
/// entry queued, so delivery is at-least-once and the remote write must be
/// idempotent on the operation id.
pub trait QueueStore: Send + Sync {
    /// Append an operation. Fails with `QueueError::Full` at the hard cap.
    fn enqueue(&self, operation: PendingOperation) -> QueueResult<OperationId>;

    /// The oldest pending entry that is not already in flight.
    ///
    /// The returned entry is marked in flight until it is removed, attempted,
    /// abandoned or released. The mark is not persisted.
    fn dequeue_next(&self) -> QueueResult<Option<PendingOperation>>;

    /// Delete a confirmed entry. Removing an absent id is not an error.
    fn remove(&self, id: &OperationId) -> QueueResult<()>;

    /// Record a failed submission attempt.
    fn mark_attempt(&self, id: &OperationId, failure: &AttemptFailure) -> QueueResult<AttemptOutcome>;

    /// Abandon an entry without submitting it (e.g. its dependency was abandoned).
    fn abandon(&self, id: &OperationId, reason: &str) -> QueueResult<()>;

    /// Put an abandoned entry back in line with a fresh attempt budget.
    fn retry_abandoned(&self, id: &OperationId) -> QueueResult<()>;

    /// Clear the in-flight mark without recording an attempt.
    fn release(&self, id: &OperationId) -> QueueResult<()>;

    /// Look up a single entry.
    fn get(&self, id: &OperationId) -> QueueResult<Option<PendingOperation>>;

    /// Full snapshot in enqueue order.
    fn list(&self) -> QueueResult<Vec<PendingOperation>>;

    /// The limits this store enforces.
    fn config(&self) -> &QueueConfig;

    /// Delete abandoned entries abandoned before `cutoff`.
    ///
    /// Pending entries are never evicted.
    fn evict_abandoned_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<OperationId>> {
        let stale: Vec<OperationId> = self
            .list()?
            .into_iter()
            .filter(|e| e.is_abandoned() && e.abandoned_at.is_some_and(|at| at < cutoff))
            .map(|e| e.id)
            .collect();
        for id in &stale {
            self.remove(id)?;
        }
        Ok(stale)
    }

    /// Number of stored entries.
    fn len(&self) -> QueueResult<usize> {
        Ok(self.list()?.len())
    }

    /// Whether nothing is stored.
    fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of entries still eligible for submission.
    fn active_count(&self) -> QueueResult<usize> {
        Ok(self.counts()?.active)
    }

    /// Abandoned entries in enqueue order.
    fn abandoned(&self) -> QueueResult<Vec<PendingOperation>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(PendingOperation::is_abandoned)
            .collect())
    }

    /// Total, active and abandoned counts from one snapshot.
    fn counts(&self) -> QueueResult<QueueCounts> {
        let entries = self.list()?;
        let abandoned = entries.iter().filter(|e| e.is_abandoned()).count();
        Ok(QueueCounts {
            total: entries.len(),
            active: entries.len() - abandoned,
            abandoned,
        })
    }
}

impl<T: QueueStore + ?Sized> QueueStore for std::sync::Arc<T> {
    fn enqueue(&self, operation: PendingOperation) -> QueueResult<OperationId> {
        (**self).enqueue(operation)
    }

    fn dequeue_next(&self) -> QueueResult<Option<PendingOperation>> {
        (**self).dequeue_next()
    }

    fn remove(&self, id: &OperationId) -> QueueResult<()> {
        (**self).remove(id)
    }

    fn mark_attempt(&self, id: &OperationId, failure: &AttemptFailure) -> QueueResult<AttemptOutcome> {
        (**self).mark_attempt(id, failure)
    }

    fn abandon(&self, id: &OperationId, reason: &str) -> QueueResult<()> {
        (**self).abandon(id, reason)
    }

    fn retry_abandoned(&self, id: &OperationId) -> QueueResult<()> {
        (**self).retry_abandoned(id)
    }

    fn release(&self, id: &OperationId) -> QueueResult<()> {
        (**self).release(id)
    }

    fn get(&self, id: &OperationId) -> QueueResult<Option<PendingOperation>> {
        (**self).get(id)
    }

    fn list(&self) -> QueueResult<Vec<PendingOperation>> {
        (**self).list()
    }

    fn config(&self) -> &QueueConfig {
        (**self).config()
    }

    fn evict_abandoned_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<OperationId>> {
        (**self).evict_abandoned_older_than(cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_and_builders() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 500);
        assert_eq!(config.max_attempts, 5);

        let config = QueueConfig::default().with_capacity(3).with_max_attempts(0);
        assert_eq!(config.capacity, 3);
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_attempt_outcome_accessors() {
        assert_eq!(AttemptOutcome::Retrying { attempts: 2 }.attempts(), 2);
        assert!(AttemptOutcome::Abandoned { attempts: 5 }.is_abandoned());
        assert!(!AttemptOutcome::Retrying { attempts: 5 }.is_abandoned());
    }
}
