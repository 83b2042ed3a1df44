//! `OfflineClient`: one object wiring queue, remote, connectivity, status,
//! cache and engine together, with explicit start and teardown of the
//! background tasks.

use crate::cache::{CacheConfig, CacheKey, CacheWarmer, ReferenceCache};
use crate::connectivity::{ConnectivityMonitor, NetworkProbe, RemoteProbe};
use crate::engine::{DrainReport, SyncConfig, SyncEngine};
use crate::error::SyncResult;
use crate::scheduler::SyncScheduler;
use crate::status::{StatusPublisher, SyncStatus};
use offline_queue::{FileQueueStore, OperationId, PendingOperation, QueueConfig, QueueStore};
use remote::{HttpRecordStore, RecordStore, RestClient, SessionContext, Subscription};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Engine over the on-disk queue and the REST record store.
pub type HttpSyncEngine = SyncEngine<FileQueueStore, HttpRecordStore>;

/// Settings for every component the client owns.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    /// Reachability probe period, when started with a probe.
    pub probe_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            sync: SyncConfig::default(),
            cache: CacheConfig::default(),
            probe_interval: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }
}

struct Background {
    scheduler: SyncScheduler,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Offline-tolerant write path plus cached reads for one signed-in client.
pub struct OfflineClient<Q, R> {
    engine: Arc<SyncEngine<Q, R>>,
    cache: Arc<ReferenceCache>,
    session: SessionContext,
    config: ClientConfig,
    background: Option<Background>,
}

impl<Q, R> OfflineClient<Q, R>
where
    Q: QueueStore + 'static,
    R: RecordStore + Clone + 'static,
{
    pub fn new(
        queue: Q,
        remote: R,
        cache: ReferenceCache,
        session: SessionContext,
        connectivity: ConnectivityMonitor,
        config: ClientConfig,
    ) -> SyncResult<Self> {
        let engine = SyncEngine::new(
            queue,
            remote,
            connectivity,
            StatusPublisher::new(),
            config.sync.clone(),
        )?;
        Ok(Self {
            engine: Arc::new(engine),
            cache: Arc::new(cache),
            session,
            config,
            background: None,
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine<Q, R>> {
        &self.engine
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.engine.connectivity()
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// Queue a write for background delivery.
    pub fn enqueue(&self, operation: PendingOperation) -> SyncResult<OperationId> {
        self.engine.enqueue(operation)
    }

    pub async fn sync_now(&self) -> DrainReport {
        self.engine.sync_now().await
    }

    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    pub fn subscribe_status(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.engine.publisher().subscribe(callback)
    }

    /// Last-known-good snapshot for `key`, if one was ever fetched.
    pub fn cached(&self, key: &CacheKey) -> Option<Value> {
        self.cache.get(key).map(|entry| entry.value)
    }

    pub fn warmer(&self) -> CacheWarmer<R> {
        CacheWarmer::new(
            self.engine.remote().clone(),
            Arc::clone(&self.cache),
            self.connectivity().clone(),
            self.session.clone(),
        )
    }

    pub fn is_running(&self) -> bool {
        self.background.is_some()
    }

    /// Start the scheduler and the cache warmer. No-op if already running.
    pub fn start(&mut self) {
        self.start_tasks(None::<NoProbe>);
    }

    /// Like [`start`](Self::start), also polling `probe` for reachability.
    pub fn start_with_probe<P: NetworkProbe + 'static>(&mut self, probe: P) {
        self.start_tasks(Some(probe));
    }

    fn start_tasks<P: NetworkProbe + 'static>(&mut self, probe: Option<P>) {
        if self.background.is_some() {
            return;
        }
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        tasks.push(
            self.warmer()
                .spawn(self.config.sync.tick_interval, shutdown_tx.subscribe()),
        );
        if let Some(probe) = probe {
            tasks.push(self.connectivity().spawn_probe(
                probe,
                self.config.probe_interval,
                shutdown_tx.subscribe(),
            ));
        }

        tracing::info!("Offline client started");
        self.background = Some(Background {
            scheduler: SyncScheduler::spawn(Arc::clone(&self.engine)),
            shutdown_tx,
            tasks,
        });
    }

    /// Stop background tasks and wait for them to finish.
    ///
    /// Queued work stays on disk for the next start.
    pub async fn stop(&mut self) {
        let Some(background) = self.background.take() else {
            return;
        };
        let _ = background.shutdown_tx.send(());
        background.scheduler.shutdown().await;
        for task in background.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Offline client stopped");
    }

    /// Stop everything and release the session's subscribers.
    pub async fn shutdown(mut self) {
        self.stop().await;
        self.session.shutdown();
    }
}

impl OfflineClient<FileQueueStore, HttpRecordStore> {
    /// Client over `data_dir` and the REST project behind `rest`.
    pub fn open(data_dir: impl AsRef<Path>, rest: RestClient, config: ClientConfig) -> SyncResult<Self> {
        let data_dir = data_dir.as_ref();
        let queue = FileQueueStore::open(data_dir, config.queue.clone())?;
        let cache = ReferenceCache::open(data_dir, config.cache.clone())?;
        let session = rest.session().clone();
        Self::new(
            queue,
            HttpRecordStore::new(rest),
            cache,
            session,
            ConnectivityMonitor::default(),
            config,
        )
    }

    /// Start with the remote health check as reachability probe.
    pub fn start_probing_remote(&mut self) {
        let probe = RemoteProbe::new(self.engine.remote().client().clone());
        self.start_with_probe(probe);
    }
}

/// Placeholder probe type for starting without a probe.
struct NoProbe;

impl NetworkProbe for NoProbe {
    async fn probe(&self) -> Option<bool> {
        None
    }
}
