//! In-memory queue store implementation.
//!
//! `MemoryQueueStore` keeps entries in memory only. It is intended for tests
//! and for sessions where surviving a restart is not required; everything is
//! lost when the process exits.

use crate::error::QueueResult;
use crate::operation::{AttemptFailure, OperationId, PendingOperation};
use crate::state::{QueueRecord, QueueState};
use crate::store::{AttemptOutcome, QueueConfig, QueueStore};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-memory implementation of `QueueStore`.
pub struct MemoryQueueStore {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl MemoryQueueStore {
    /// Create an empty store with default limits.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create an empty store with the given limits.
    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::new(config.clone())),
            config,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

fn accept(_: &QueueRecord) -> QueueResult<()> {
    Ok(())
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(&self, operation: PendingOperation) -> QueueResult<OperationId> {
        self.state().enqueue(operation, accept)
    }

    fn dequeue_next(&self) -> QueueResult<Option<PendingOperation>> {
        Ok(self.state().dequeue_next())
    }

    fn remove(&self, id: &OperationId) -> QueueResult<()> {
        self.state().remove(id, accept).map(|_| ())
    }

    fn mark_attempt(&self, id: &OperationId, failure: &AttemptFailure) -> QueueResult<AttemptOutcome> {
        self.state().mark_attempt(id, failure, Utc::now(), accept)
    }

    fn abandon(&self, id: &OperationId, reason: &str) -> QueueResult<()> {
        self.state().abandon(id, reason, Utc::now(), accept)
    }

    fn retry_abandoned(&self, id: &OperationId) -> QueueResult<()> {
        self.state().retry_abandoned(id, accept)
    }

    fn release(&self, id: &OperationId) -> QueueResult<()> {
        self.state().release(id);
        Ok(())
    }

    fn get(&self, id: &OperationId) -> QueueResult<Option<PendingOperation>> {
        Ok(self.state().get(id))
    }

    fn list(&self) -> QueueResult<Vec<PendingOperation>> {
        Ok(self.state().list())
    }

    fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn evict_abandoned_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<OperationId>> {
        let mut state = self.state();
        let stale = state.abandoned_before(cutoff);
        for id in &stale {
            state.remove(id, accept)?;
        }
        Ok(stale)
    }

    fn len(&self) -> QueueResult<usize> {
        Ok(self.state().len())
    }
}
