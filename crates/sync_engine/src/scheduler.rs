//! Timer-driven drain trigger.
//!
//! The scheduler owns the decision of *when* to run a pass. It reacts to
//! reconnects, to enqueue/resolution nudges, and to a periodic tick. After a
//! pass stops on a failure it waits an exponential backoff before the next
//! automatic pass; a reconnect resets the backoff and drains right away.

use crate::engine::{DrainReport, StopReason, SyncEngine};
use offline_queue::QueueStore;
use remote::RecordStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Background task running drain passes for one engine.
pub struct SyncScheduler {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Consecutive-failure bookkeeping between passes.
struct Backoff {
    failures: u32,
    next_pass: Instant,
}

impl SyncScheduler {
    /// Start the scheduler. The first pass runs immediately.
    pub fn spawn<Q, R>(engine: Arc<SyncEngine<Q, R>>) -> Self
    where
        Q: QueueStore + 'static,
        R: RecordStore + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move {
            let wake = engine.wake_handle();
            let mut online_rx = engine.connectivity().watch();
            let mut backoff = Backoff {
                failures: 0,
                next_pass: Instant::now(),
            };

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Sync scheduler received shutdown signal");
                        break;
                    }
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *online_rx.borrow_and_update();
                        if online {
                            tracing::info!("Back online, draining queue");
                            backoff.failures = 0;
                            let report = engine.drain().await;
                            backoff.record(&engine, &report);
                        }
                    }
                    _ = wake.notified() => {
                        if backoff.failures == 0 {
                            let report = engine.drain().await;
                            backoff.record(&engine, &report);
                        } else {
                            tracing::debug!(failures = backoff.failures, "Nudge ignored while backing off");
                        }
                    }
                    _ = tokio::time::sleep_until(backoff.next_pass) => {
                        let report = engine.drain().await;
                        backoff.record(&engine, &report);
                    }
                }
            }
        });

        Self { shutdown_tx, handle }
    }

    /// Stop the task and wait for an in-flight pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Sync scheduler task ended abnormally");
        }
    }
}

impl Backoff {
    fn record<Q, R>(&mut self, engine: &SyncEngine<Q, R>, report: &DrainReport)
    where
        Q: QueueStore,
        R: RecordStore,
    {
        let config = engine.config();
        if report.stop.is_failure() {
            self.failures = self.failures.saturating_add(1);
            let delay = config.backoff_delay(self.failures);
            tracing::info!(failures = self.failures, delay_ms = delay.as_millis() as u64, "Backing off");
            self.next_pass = Instant::now() + delay;
            return;
        }
        if report.stop == StopReason::Completed {
            self.failures = 0;
        }
        if report.stop != StopReason::AlreadyRunning {
            self.next_pass = Instant::now() + config.tick_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::engine::SyncConfig;
    use crate::status::StatusPublisher;
    use offline_queue::{MemoryQueueStore, PendingOperation};
    use remote::{MemoryRecordStore, RemoteError};
    use serde_json::json;
    use std::time::Duration;

    fn engine(
        remote: MemoryRecordStore,
        online: bool,
    ) -> Arc<SyncEngine<MemoryQueueStore, MemoryRecordStore>> {
        let config = SyncConfig::default()
            .with_backoff(Duration::from_secs(2), Duration::from_secs(60))
            .with_tick_interval(Duration::from_secs(600));
        Arc::new(
            SyncEngine::new(
                MemoryQueueStore::new(),
                remote,
                ConnectivityMonitor::new(online),
                StatusPublisher::new(),
                config,
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_triggers_drain() {
        let remote = MemoryRecordStore::new();
        let engine = engine(remote.clone(), false);
        for _ in 0..3 {
            engine.enqueue(PendingOperation::create_observation(json!({}))).unwrap();
        }
        let scheduler = SyncScheduler::spawn(Arc::clone(&engine));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.status().pending_count, 3);
        assert!(remote.calls().is_empty());

        engine.connectivity().set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.status().pending_count, 0);
        assert_eq!(remote.inserted_ids().len(), 3);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_nudges_drain() {
        let remote = MemoryRecordStore::new();
        let engine = engine(remote.clone(), true);
        let scheduler = SyncScheduler::spawn(Arc::clone(&engine));
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine.enqueue(PendingOperation::create_observation(json!({}))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.queue().is_empty().unwrap());

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_exponentially() {
        let remote = MemoryRecordStore::new();
        remote.set_failure(Some(RemoteError::Network("unreachable".into())));
        let engine = engine(remote.clone(), true);
        engine.enqueue(PendingOperation::create_observation(json!({}))).unwrap();
        let scheduler = SyncScheduler::spawn(Arc::clone(&engine));

        // Pass at t=0, then retries at t=2s and t=6s.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(remote.calls().len(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(remote.calls().len(), 2);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(remote.calls().len(), 2);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(remote.calls().len(), 3);

        remote.set_failure(None);
        engine.connectivity().set_online(false);
        engine.connectivity().set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.queue().is_empty().unwrap());

        scheduler.shutdown().await;
    }
}
