//! In-memory queue state shared by every store backend.
//!
//! Each mutating method validates the request, hands the resulting
//! [`QueueRecord`] to a `commit` callback and only applies the change in
//! memory once the callback succeeds. The file store persists the record in
//! the callback; the memory store accepts everything.

use crate::error::{QueueError, QueueResult};
use crate::operation::{AttemptFailure, EntryStatus, OperationId, PendingOperation};
use crate::store::{AttemptOutcome, QueueConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One durable change to the queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueRecord {
    /// A new entry was appended (also used for compacted snapshots).
    Enqueued { operation: PendingOperation },
    /// An existing entry changed; carries its full post-change state.
    Updated { operation: PendingOperation },
    /// An entry left the queue.
    Removed { id: OperationId },
}

#[derive(Debug, Clone)]
pub(crate) struct QueueState {
    config: QueueConfig,
    /// Entries in enqueue order.
    entries: Vec<PendingOperation>,
    /// Entries handed out by `dequeue_next` and not yet settled. Memory only.
    in_flight: HashSet<OperationId>,
}

impl QueueState {
    pub(crate) fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            in_flight: HashSet::new(),
        }
    }

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn position(&self, id: &OperationId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == *id)
    }

    /// Apply a record without validation (journal replay).
    pub(crate) fn replay(&mut self, record: QueueRecord) {
        match record {
            QueueRecord::Enqueued { operation } | QueueRecord::Updated { operation } => {
                match self.position(&operation.id) {
                    Some(idx) => self.entries[idx] = operation,
                    None => self.entries.push(operation),
                }
            }
            QueueRecord::Removed { id } => {
                if let Some(idx) = self.position(&id) {
                    self.entries.remove(idx);
                }
            }
        }
    }

    /// Records that reproduce the current state from scratch.
    pub(crate) fn snapshot_records(&self) -> Vec<QueueRecord> {
        self.entries
            .iter()
            .cloned()
            .map(|operation| QueueRecord::Enqueued { operation })
            .collect()
    }

    pub(crate) fn enqueue<F>(&mut self, operation: PendingOperation, commit: F) -> QueueResult<OperationId>
    where
        F: FnOnce(&QueueRecord) -> QueueResult<()>,
    {
        if self.entries.len() >= self.config.capacity {
            return Err(QueueError::Full {
                capacity: self.config.capacity,
            });
        }
        if self.position(&operation.id).is_some() {
            return Err(QueueError::DuplicateId(operation.id));
        }

        let id = operation.id;
        let record = QueueRecord::Enqueued { operation };
        commit(&record)?;
        self.replay(record);
        Ok(id)
    }

    pub(crate) fn dequeue_next(&mut self) -> Option<PendingOperation> {
        let next = self
            .entries
            .iter()
            .find(|e| e.is_pending() && !self.in_flight.contains(&e.id))?
            .clone();
        self.in_flight.insert(next.id);
        Some(next)
    }

    pub(crate) fn release(&mut self, id: &OperationId) {
        self.in_flight.remove(id);
    }

    pub(crate) fn remove<F>(&mut self, id: &OperationId, commit: F) -> QueueResult<bool>
    where
        F: FnOnce(&QueueRecord) -> QueueResult<()>,
    {
        self.in_flight.remove(id);
        if self.position(id).is_none() {
            return Ok(false);
        }

        let record = QueueRecord::Removed { id: *id };
        commit(&record)?;
        self.replay(record);
        Ok(true)
    }

    pub(crate) fn mark_attempt<F>(
        &mut self,
        id: &OperationId,
        failure: &AttemptFailure,
        now: DateTime<Utc>,
        commit: F,
    ) -> QueueResult<AttemptOutcome>
    where
        F: FnOnce(&QueueRecord) -> QueueResult<()>,
    {
        let idx = self.position(id).ok_or(QueueError::NotFound(*id))?;
        let mut updated = self.entries[idx].clone();
        if updated.is_abandoned() {
            return Err(QueueError::InvalidState {
                id: *id,
                reason: "entry is abandoned".to_string(),
            });
        }

        updated.attempts = updated.attempts.saturating_add(1);
        updated.last_error = Some(failure.message.clone());
        let abandon = failure.permanent && updated.attempts >= self.config.max_attempts;
        if abandon {
            updated.status = EntryStatus::Abandoned;
            updated.abandoned_at = Some(now);
        }
        let attempts = updated.attempts;

        let record = QueueRecord::Updated { operation: updated };
        commit(&record)?;
        self.replay(record);
        self.in_flight.remove(id);

        Ok(if abandon {
            AttemptOutcome::Abandoned { attempts }
        } else {
            AttemptOutcome::Retrying { attempts }
        })
    }

    pub(crate) fn abandon<F>(
        &mut self,
        id: &OperationId,
        reason: &str,
        now: DateTime<Utc>,
        commit: F,
    ) -> QueueResult<()>
    where
        F: FnOnce(&QueueRecord) -> QueueResult<()>,
    {
        let idx = self.position(id).ok_or(QueueError::NotFound(*id))?;
        let mut updated = self.entries[idx].clone();
        if updated.is_abandoned() {
            return Ok(());
        }
        updated.status = EntryStatus::Abandoned;
        updated.abandoned_at = Some(now);
        updated.last_error = Some(reason.to_string());

        let record = QueueRecord::Updated { operation: updated };
        commit(&record)?;
        self.replay(record);
        self.in_flight.remove(id);
        Ok(())
    }

    pub(crate) fn retry_abandoned<F>(&mut self, id: &OperationId, commit: F) -> QueueResult<()>
    where
        F: FnOnce(&QueueRecord) -> QueueResult<()>,
    {
        let idx = self.position(id).ok_or(QueueError::NotFound(*id))?;
        let mut updated = self.entries[idx].clone();
        if !updated.is_abandoned() {
            return Err(QueueError::InvalidState {
                id: *id,
                reason: "only abandoned entries can be retried".to_string(),
            });
        }
        // last_error is kept for diagnostics; the retry budget starts over.
        updated.status = EntryStatus::Pending;
        updated.abandoned_at = None;
        updated.attempts = 0;

        let record = QueueRecord::Updated { operation: updated };
        commit(&record)?;
        self.replay(record);
        Ok(())
    }

    /// Ids of abandoned entries abandoned before `cutoff`.
    pub(crate) fn abandoned_before(&self, cutoff: DateTime<Utc>) -> Vec<OperationId> {
        self.entries
            .iter()
            .filter(|e| e.is_abandoned() && e.abandoned_at.is_some_and(|at| at < cutoff))
            .map(|e| e.id)
            .collect()
    }

    pub(crate) fn get(&self, id: &OperationId) -> Option<PendingOperation> {
        self.position(id).map(|idx| self.entries[idx].clone())
    }

    pub(crate) fn list(&self) -> Vec<PendingOperation> {
        self.entries.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accept(_: &QueueRecord) -> QueueResult<()> {
        Ok(())
    }

    fn op(n: u128) -> PendingOperation {
        PendingOperation::create_observation(json!({ "n": n as u64 })).with_id(OperationId::from_u128(n))
    }

    #[test]
    fn test_failed_commit_leaves_state_unchanged() {
        let mut state = QueueState::new(QueueConfig::default());
        let result = state.enqueue(op(1), |_| {
            Err(QueueError::Io(std::io::Error::other("disk full")))
        });
        assert!(matches!(result, Err(QueueError::Io(_))));
        assert_eq!(state.len(), 0);

        state.enqueue(op(1), accept).unwrap();
        let failure = AttemptFailure::transient("timeout");
        let result = state.mark_attempt(&OperationId::from_u128(1), &failure, Utc::now(), |_| {
            Err(QueueError::Io(std::io::Error::other("disk full")))
        });
        assert!(result.is_err());
        assert_eq!(state.get(&OperationId::from_u128(1)).unwrap().attempts, 0);
    }

    #[test]
    fn test_dequeue_skips_in_flight_and_abandoned() {
        let mut state = QueueState::new(QueueConfig::default().with_max_attempts(1));
        state.enqueue(op(1), accept).unwrap();
        state.enqueue(op(2), accept).unwrap();
        state.enqueue(op(3), accept).unwrap();

        let first = state.dequeue_next().unwrap();
        assert_eq!(first.id, OperationId::from_u128(1));
        let second = state.dequeue_next().unwrap();
        assert_eq!(second.id, OperationId::from_u128(2));

        let outcome = state
            .mark_attempt(&second.id, &AttemptFailure::permanent("bad"), Utc::now(), accept)
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Abandoned { attempts: 1 });

        state.release(&first.id);
        assert_eq!(state.dequeue_next().unwrap().id, OperationId::from_u128(1));
        assert_eq!(state.dequeue_next().unwrap().id, OperationId::from_u128(3));
        assert!(state.dequeue_next().is_none());
    }

    #[test]
    fn test_replay_reproduces_state() {
        let mut state = QueueState::new(QueueConfig::default());
        let mut journal = Vec::new();
        for n in 1..=3 {
            state
                .enqueue(op(n), |r| {
                    journal.push(r.clone());
                    Ok(())
                })
                .unwrap();
        }
        state
            .remove(&OperationId::from_u128(2), |r| {
                journal.push(r.clone());
                Ok(())
            })
            .unwrap();
        state
            .mark_attempt(
                &OperationId::from_u128(3),
                &AttemptFailure::transient("offline"),
                Utc::now(),
                |r| {
                    journal.push(r.clone());
                    Ok(())
                },
            )
            .unwrap();

        let mut replayed = QueueState::new(QueueConfig::default());
        for record in journal {
            replayed.replay(record);
        }
        assert_eq!(replayed.list(), state.list());
    }

    #[test]
    fn test_remove_absent_is_not_an_error() {
        let mut state = QueueState::new(QueueConfig::default());
        let mut commits = 0;
        let removed = state
            .remove(&OperationId::from_u128(42), |_| {
                commits += 1;
                Ok(())
            })
            .unwrap();
        assert!(!removed);
        assert_eq!(commits, 0);
    }

    #[test]
    fn test_record_serialization_is_tagged() {
        let record = QueueRecord::Removed {
            id: OperationId::from_u128(9),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "removed");
    }
}
