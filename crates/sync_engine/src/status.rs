//! Sync Status Publisher.
//!
//! `SyncStatus` is a read projection over the queue plus the engine's drain
//! state. It is never persisted; the publisher recomputes it after every
//! queue mutation and every drain step and pushes it to subscribers.

use chrono::{DateTime, Utc};
use offline_queue::{QueueResult, QueueStore};
use remote::{Subscribers, Subscription};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Drain state of the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Draining,
    /// Offline; draining resumes on reconnect.
    Paused,
}

/// Position within the current drain pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
}

/// Everything the presentation layer needs to show sync state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Every stored entry; always equals `list().len()` of the queue.
    pub pending_count: usize,
    /// Entries still eligible for submission (pending minus abandoned).
    pub active_count: usize,
    /// Entries held for manual resolution.
    pub abandoned_count: usize,
    pub is_syncing: bool,
    pub progress: SyncProgress,
    pub state: EngineState,
    pub online: bool,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

struct PublisherInner {
    status: Mutex<SyncStatus>,
    subscribers: Subscribers<SyncStatus>,
}

/// Single source of truth for [`SyncStatus`]. Cheap to clone.
#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<PublisherInner>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                status: Mutex::new(SyncStatus::default()),
                subscribers: Subscribers::new(),
            }),
        }
    }

    fn status(&self) -> MutexGuard<'_, SyncStatus> {
        self.inner.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> SyncStatus {
        self.status().clone()
    }

    /// Apply `change` and notify subscribers if anything differs.
    pub fn update(&self, change: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut status = self.status();
            let before = status.clone();
            change(&mut *status);
            if *status == before {
                return;
            }
            status.clone()
        };
        self.inner.subscribers.publish(&snapshot);
    }

    /// Recompute the queue-derived counts from one snapshot of `queue`.
    pub fn refresh_counts<Q: QueueStore + ?Sized>(&self, queue: &Q) -> QueueResult<()> {
        let counts = queue.counts()?;
        self.update(|status| {
            status.pending_count = counts.total;
            status.active_count = counts.active;
            status.abandoned_count = counts.abandoned;
        });
        Ok(())
    }

    pub fn subscribe(&self, callback: impl Fn(&SyncStatus) + Send + Sync + 'static) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offline_queue::{MemoryQueueStore, PendingOperation};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_update_publishes_only_changes() {
        let publisher = StatusPublisher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let _sub = publisher.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        publisher.update(|s| s.is_syncing = true);
        publisher.update(|s| s.is_syncing = true);
        publisher.update(|s| s.progress = SyncProgress { current: 1, total: 3 });

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(publisher.current().progress.total, 3);
    }

    #[test]
    fn test_refresh_counts_matches_queue() {
        let queue = MemoryQueueStore::new();
        let publisher = StatusPublisher::new();
        let a = queue.enqueue(PendingOperation::create_observation(json!({}))).unwrap();
        queue.enqueue(PendingOperation::create_observation(json!({}))).unwrap();
        queue.abandon(&a, "rejected").unwrap();

        publisher.refresh_counts(&queue).unwrap();
        let status = publisher.current();
        assert_eq!(status.pending_count, queue.list().unwrap().len());
        assert_eq!(status.active_count, 1);
        assert_eq!(status.abandoned_count, 1);
    }

    #[test]
    fn test_status_serializes_for_display() {
        let status = SyncStatus {
            state: EngineState::Paused,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "paused");
        assert_eq!(json["progress"]["current"], 0);
    }
}
