//! Sync Engine.
//!
//! Drains the local queue against the remote record store one entry at a
//! time, strictly in creation order. States:
//!
//! ```text
//! Idle --(online, work queued)--> Draining --(queue empty)--> Idle
//!                                 Draining --(offline)-----> Paused
//! Paused --(online)--> Draining | Idle
//! ```
//!
//! At most one pass runs at a time; a trigger while draining is a no-op that
//! reports [`StopReason::AlreadyRunning`]. A pass never returns an error: the
//! outcome is recorded in the [`DrainReport`] and in the published status.

use crate::connectivity::ConnectivityMonitor;
use crate::dispatch::{self, Collections, Submission};
use crate::error::{SyncError, SyncResult};
use crate::status::{EngineState, StatusPublisher, SyncProgress, SyncStatus};
use chrono::Utc;
use offline_queue::{
    AttemptFailure, OperationId, PendingOperation, QueueError, QueueResult, QueueStore,
};
use remote::{ErrorClass, RecordStore, RemoteError, Subscription};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Engine timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound for one remote submission; exceeding it is a transient failure.
    pub submit_timeout: Duration,
    /// First automatic retry delay after a pass stopped on a failure.
    pub backoff_base: Duration,
    /// Retry delay ceiling.
    pub backoff_max: Duration,
    /// Period of the scheduler's housekeeping pass.
    pub tick_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            submit_timeout: remote::DEFAULT_TIMEOUT,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max.max(base);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Delay before the next automatic pass after `failures` consecutive
    /// failed passes: `base * 2^(failures - 1)`, capped at `backoff_max`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Why a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No active entries remain.
    Completed,
    /// Connectivity dropped during the pass.
    Offline,
    /// An entry failed transiently and stays queued for the next pass.
    TransientFailure,
    /// An entry failed permanently but still has attempts left.
    PermanentFailure,
    /// Another pass was already running.
    AlreadyRunning,
    /// The pass was requested while offline.
    NotOnline,
    /// The local queue itself failed.
    StorageFailure,
}

impl StopReason {
    /// Whether the scheduler should back off before the next pass.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::TransientFailure | StopReason::PermanentFailure | StopReason::StorageFailure
        )
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Active entries when the pass started.
    pub total: usize,
    /// Entries applied by this pass.
    pub succeeded: usize,
    /// Entries found already applied (replay after an interrupted pass).
    pub already_applied: usize,
    /// Entries abandoned by this pass.
    pub abandoned: usize,
    pub stop: StopReason,
}

impl DrainReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            already_applied: 0,
            abandoned: 0,
            stop: StopReason::Completed,
        }
    }

    fn stopped(stop: StopReason) -> Self {
        Self {
            stop,
            ..Self::new(0)
        }
    }

    /// Entries that left the active set during this pass.
    pub fn processed(&self) -> usize {
        self.succeeded + self.already_applied + self.abandoned
    }
}

enum Step {
    Continue,
    Stop(StopReason),
}

/// Clears the syncing flag when a pass ends, however it ends.
struct SyncGate<'a>(&'a AtomicBool);

impl<'a> SyncGate<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for SyncGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Clears a dequeued entry's in-flight mark once processing ends, so an
/// entry left behind by a failed queue write is picked up again first.
struct InFlight<'a, Q: QueueStore> {
    queue: &'a Q,
    id: OperationId,
}

impl<Q: QueueStore> Drop for InFlight<'_, Q> {
    fn drop(&mut self) {
        if let Err(e) = self.queue.release(&self.id) {
            tracing::warn!(operation_id = %self.id, error = %e, "Could not release in-flight entry");
        }
    }
}

/// The drain state machine over a queue `Q` and a remote store `R`.
pub struct SyncEngine<Q, R> {
    queue: Q,
    remote: R,
    connectivity: ConnectivityMonitor,
    publisher: StatusPublisher,
    config: SyncConfig,
    collections: Collections,
    syncing: AtomicBool,
    wake: Arc<Notify>,
    _connectivity: Subscription,
}

impl<Q, R> SyncEngine<Q, R>
where
    Q: QueueStore,
    R: RecordStore,
{
    pub fn new(
        queue: Q,
        remote: R,
        connectivity: ConnectivityMonitor,
        publisher: StatusPublisher,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let wake = Arc::new(Notify::new());

        let online = connectivity.current_status();
        publisher.update(|s| {
            s.online = online;
            s.state = if online { EngineState::Idle } else { EngineState::Paused };
        });
        publisher.refresh_counts(&queue)?;

        let status = publisher.clone();
        let subscription = connectivity.subscribe(move |&online| {
            status.update(|s| {
                s.online = online;
                if !online {
                    s.state = EngineState::Paused;
                } else if s.is_syncing {
                    s.state = EngineState::Draining;
                } else if s.state == EngineState::Paused {
                    s.state = EngineState::Idle;
                }
            });
        });

        Ok(Self {
            queue,
            remote,
            connectivity,
            publisher,
            config,
            collections: Collections::default(),
            syncing: AtomicBool::new(false),
            wake,
            _connectivity: subscription,
        })
    }

    /// Use different remote collection names.
    pub fn with_collections(mut self, collections: Collections) -> Self {
        self.collections = collections;
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Signalled on enqueue and on manual resolution.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SyncStatus {
        self.publisher.current()
    }

    /// Queue a write. Fails synchronously when the queue is full.
    pub fn enqueue(&self, operation: PendingOperation) -> SyncResult<OperationId> {
        dispatch::validate(&operation).map_err(SyncError::InvalidOperation)?;
        if operation.depends_on == Some(operation.id) {
            return Err(SyncError::InvalidOperation(format!(
                "operation {} depends on itself",
                operation.id
            )));
        }

        let kind = operation.kind;
        let id = match self.queue.enqueue(operation) {
            Ok(id) => id,
            Err(e) => {
                if e.is_capacity() {
                    tracing::warn!(kind = %kind, "Queue full, write not queued");
                }
                return Err(e.into());
            }
        };
        tracing::debug!(operation_id = %id, kind = %kind, "Operation queued");
        self.publisher.refresh_counts(&self.queue)?;
        self.wake.notify_one();
        Ok(id)
    }

    /// Manual trigger. Runs a pass now if online and none is running.
    pub async fn sync_now(&self) -> DrainReport {
        tracing::info!("Manual sync requested");
        self.drain().await
    }

    /// Run one drain pass.
    pub async fn drain(&self) -> DrainReport {
        if !self.connectivity.current_status() {
            self.publisher.update(|s| {
                s.online = false;
                s.state = EngineState::Paused;
            });
            return DrainReport::stopped(StopReason::NotOnline);
        }
        let Some(_gate) = SyncGate::acquire(&self.syncing) else {
            tracing::debug!("Drain already running");
            return DrainReport::stopped(StopReason::AlreadyRunning);
        };

        let total = match self.queue.active_count() {
            Ok(n) => n,
            Err(e) => {
                self.record_storage_failure(&e);
                return DrainReport::stopped(StopReason::StorageFailure);
            }
        };
        let mut report = DrainReport::new(total);
        if total > 0 {
            tracing::info!(total, "Drain pass started");
        }
        self.publisher.update(|s| {
            s.is_syncing = true;
            s.state = EngineState::Draining;
            s.progress = SyncProgress { current: 0, total };
        });

        report.stop = loop {
            if !self.connectivity.current_status() {
                tracing::info!(processed = report.processed(), "Went offline, pausing drain");
                break StopReason::Offline;
            }
            let operation = match self.queue.dequeue_next() {
                Ok(Some(op)) => op,
                Ok(None) => break StopReason::Completed,
                Err(e) => {
                    self.record_storage_failure(&e);
                    break StopReason::StorageFailure;
                }
            };
            let _in_flight = InFlight {
                queue: &self.queue,
                id: operation.id,
            };
            match self.process(&operation, &mut report).await {
                Ok(Step::Continue) => {}
                Ok(Step::Stop(reason)) => break reason,
                Err(e) => {
                    self.record_storage_failure(&e);
                    break StopReason::StorageFailure;
                }
            }
            self.publish_progress(&report);
        };

        self.finish(&report);
        report
    }

    async fn process(&self, operation: &PendingOperation, report: &mut DrainReport) -> QueueResult<Step> {
        if let Some(dependency) = operation.depends_on {
            match self.queue.get(&dependency)? {
                Some(dep) if dep.is_abandoned() => {
                    let reason = format!("dependency {} was abandoned", dependency);
                    tracing::warn!(operation_id = %operation.id, %dependency, "Abandoning dependent operation");
                    self.queue.abandon(&operation.id, &reason)?;
                    report.abandoned += 1;
                    return Ok(Step::Continue);
                }
                Some(_) => {
                    let error = RemoteError::InvalidPayload(format!(
                        "dependency {} not yet confirmed",
                        dependency
                    ));
                    return self.record_failure(operation, &error, report);
                }
                None => {}
            }
        }

        let submitted = tokio::time::timeout(
            self.config.submit_timeout,
            dispatch::submit(&self.remote, &self.collections, operation),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout));

        match submitted {
            Ok(submission) => {
                self.queue.remove(&operation.id)?;
                match submission {
                    Submission::Applied => report.succeeded += 1,
                    Submission::AlreadyApplied => report.already_applied += 1,
                }
                tracing::debug!(operation_id = %operation.id, kind = %operation.kind, ?submission, "Operation confirmed");
                Ok(Step::Continue)
            }
            Err(error) => self.record_failure(operation, &error, report),
        }
    }

    fn record_failure(
        &self,
        operation: &PendingOperation,
        error: &RemoteError,
        report: &mut DrainReport,
    ) -> QueueResult<Step> {
        let transient = error.class() == ErrorClass::Transient;
        let failure = if transient {
            AttemptFailure::transient(error.to_string())
        } else {
            AttemptFailure::permanent(error.to_string())
        };
        let outcome = self.queue.mark_attempt(&operation.id, &failure)?;
        let message = error.to_string();
        self.publisher.update(|s| s.last_error = Some(message));

        if transient {
            tracing::warn!(operation_id = %operation.id, kind = %operation.kind, %error, "Transient failure, stopping pass");
            return Ok(Step::Stop(StopReason::TransientFailure));
        }
        if outcome.is_abandoned() {
            tracing::warn!(
                operation_id = %operation.id,
                kind = %operation.kind,
                attempts = outcome.attempts(),
                %error,
                "Operation abandoned"
            );
            report.abandoned += 1;
            return Ok(Step::Continue);
        }
        tracing::warn!(
            operation_id = %operation.id,
            kind = %operation.kind,
            attempts = outcome.attempts(),
            %error,
            "Permanent failure, stopping pass"
        );
        Ok(Step::Stop(StopReason::PermanentFailure))
    }

    fn publish_progress(&self, report: &DrainReport) {
        let processed = report.processed();
        let remaining = match self.queue.active_count() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Could not count remaining entries");
                report.total.saturating_sub(processed)
            }
        };
        self.publisher.update(|s| {
            s.progress = SyncProgress {
                current: processed,
                total: processed + remaining,
            };
        });
        if let Err(e) = self.publisher.refresh_counts(&self.queue) {
            tracing::warn!(error = %e, "Could not refresh queue counts");
        }
    }

    fn finish(&self, report: &DrainReport) {
        if let Err(e) = self.publisher.refresh_counts(&self.queue) {
            tracing::warn!(error = %e, "Could not refresh queue counts");
        }
        let online = self.connectivity.current_status();
        let stop = report.stop;
        self.publisher.update(|s| {
            s.is_syncing = false;
            s.online = online;
            s.state = if online { EngineState::Idle } else { EngineState::Paused };
            if stop == StopReason::Completed {
                s.last_synced_at = Some(Utc::now());
                if report.abandoned == 0 {
                    s.last_error = None;
                }
            }
        });
        tracing::info!(
            succeeded = report.succeeded,
            already_applied = report.already_applied,
            abandoned = report.abandoned,
            stop = ?report.stop,
            "Drain pass finished"
        );
    }

    fn record_storage_failure(&self, error: &QueueError) {
        tracing::error!(%error, "Queue storage failed during drain");
        let message = error.to_string();
        self.publisher.update(|s| s.last_error = Some(message));
    }

    /// Entries held for manual resolution, in creation order.
    pub fn abandoned(&self) -> SyncResult<Vec<PendingOperation>> {
        Ok(self.queue.abandoned()?)
    }

    fn require_abandoned(&self, id: &OperationId) -> SyncResult<()> {
        match self.queue.get(id)? {
            None => Err(QueueError::NotFound(*id).into()),
            Some(op) if !op.is_abandoned() => Err(SyncError::NotAbandoned(*id)),
            Some(_) => Ok(()),
        }
    }

    /// Put an abandoned entry back in line with a fresh attempt budget.
    pub fn retry_abandoned(&self, id: &OperationId) -> SyncResult<()> {
        self.require_abandoned(id)?;
        self.queue.retry_abandoned(id)?;
        tracing::info!(operation_id = %id, "Abandoned operation requeued");
        self.publisher.refresh_counts(&self.queue)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Drop an abandoned entry for good.
    pub fn discard(&self, id: &OperationId) -> SyncResult<()> {
        self.require_abandoned(id)?;
        self.queue.remove(id)?;
        tracing::info!(operation_id = %id, "Abandoned operation discarded");
        self.publisher.refresh_counts(&self.queue)?;
        Ok(())
    }

    /// Delete abandoned entries older than `max_age`. Pending entries stay.
    pub fn evict_stale(&self, max_age: chrono::Duration) -> SyncResult<Vec<OperationId>> {
        let evicted = self.queue.evict_abandoned_older_than(Utc::now() - max_age)?;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted stale abandoned operations");
            self.publisher.refresh_counts(&self.queue)?;
        }
        Ok(evicted)
    }
}
