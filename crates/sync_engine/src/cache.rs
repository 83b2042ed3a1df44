//! Reference data cache and Cache Warmer.
//!
//! Read screens keep working offline by reading last-known-good snapshots of
//! reference data (dictionaries, the user's profile, recently touched
//! players). The warmer refreshes them opportunistically while online.
//!
//! # Storage
//!
//! ```text
//! data/
//! ├── reference_cache.json       # All entries, rewritten on every refresh
//! └── reference_cache.json.tmp   # Transient, only present while writing
//! ```
//!
//! The cache is bounded; beyond capacity the least recently fetched entry is
//! evicted. Entries are replaced wholesale on refresh, never merged.

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use remote::{Order, Query, RecordStore, SessionContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CACHE_FILE: &str = "reference_cache.json";
const CACHE_TMP_FILE: &str = "reference_cache.json.tmp";

/// Default number of cached entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// Number of recently updated players kept warm.
pub const RECENT_PLAYERS: usize = 50;

/// Resource type plus query parameters, rendered `resource?k1=v1&k2=v2`
/// with parameters sorted so equal queries share a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new<K, V>(resource: &str, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if params.is_empty() {
            return Self(resource.to_string());
        }
        params.sort();
        let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        Self(format!("{}?{}", resource, rendered.join("&")))
    }

    /// Key for a `select` of `query` on `collection`.
    pub fn for_query(collection: &str, query: &Query) -> Self {
        Self::new(collection, query.to_pairs())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The resource part, without parameters.
    pub fn resource(&self) -> &str {
        self.0.split('?').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last-known-good snapshot of one remote read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedReferenceEntry {
    pub key: CacheKey,
    pub value: Value,
    pub fetched_at: DateTime<Utc>,
    /// Fetch order; lowest is evicted first.
    #[serde(default)]
    sequence: u64,
}

impl CachedReferenceEntry {
    pub fn is_stale(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.fetched_at > max_age
    }
}

/// Cache limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[derive(Default, Serialize, Deserialize)]
struct CacheFile {
    entries: Vec<CachedReferenceEntry>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CachedReferenceEntry>,
    next_sequence: u64,
}

/// Bounded key/value store of reference snapshots.
pub struct ReferenceCache {
    path: Option<PathBuf>,
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl ReferenceCache {
    /// A cache that is never written to disk.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self {
            path: None,
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Open (or create) the cache file in `dir`.
    ///
    /// An unreadable file is logged and replaced; cached data is always
    /// reproducible from the remote store.
    pub fn open(dir: impl AsRef<Path>, config: CacheConfig) -> SyncResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(CACHE_FILE);

        let mut inner = CacheInner::default();
        if path.exists() {
            let loaded = fs::read(&path).map_err(SyncError::from).and_then(|bytes| {
                serde_json::from_slice::<CacheFile>(&bytes).map_err(SyncError::from)
            });
            match loaded {
                Ok(file) => {
                    for entry in file.entries {
                        inner.next_sequence = inner.next_sequence.max(entry.sequence + 1);
                        inner.entries.insert(entry.key.clone(), entry);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable reference cache");
                }
            }
        }

        let cache = Self {
            path: Some(path),
            config,
            inner: Mutex::new(inner),
        };
        {
            let mut inner = cache.inner();
            if cache.evict_excess(&mut inner) > 0 {
                cache.persist(&inner)?;
            }
        }
        Ok(cache)
    }

    fn inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedReferenceEntry> {
        self.inner().entries.get(key).cloned()
    }

    /// Missing entries count as stale.
    pub fn is_stale(&self, key: &CacheKey, max_age: chrono::Duration) -> bool {
        self.get(key)
            .map_or(true, |entry| entry.is_stale(max_age, Utc::now()))
    }

    /// Replace the snapshot stored under `key`.
    pub fn put(&self, key: CacheKey, value: Value) -> SyncResult<()> {
        self.put_at(key, value, Utc::now())
    }

    fn put_at(&self, key: CacheKey, value: Value, fetched_at: DateTime<Utc>) -> SyncResult<()> {
        let mut inner = self.inner();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.insert(
            key.clone(),
            CachedReferenceEntry {
                key,
                value,
                fetched_at,
                sequence,
            },
        );
        self.evict_excess(&mut inner);
        self.persist(&inner)
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from least to most recently fetched.
    pub fn keys(&self) -> Vec<CacheKey> {
        let inner = self.inner();
        let mut entries: Vec<&CachedReferenceEntry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.sequence);
        entries.into_iter().map(|e| e.key.clone()).collect()
    }

    fn evict_excess(&self, inner: &mut CacheInner) -> usize {
        let mut evicted = 0;
        while inner.entries.len() > self.config.capacity {
            let oldest = inner
                .entries
                .values()
                .min_by_key(|e| e.sequence)
                .map(|e| e.key.clone());
            let Some(key) = oldest else { break };
            inner.entries.remove(&key);
            tracing::debug!(key = %key, "Evicted reference cache entry");
            evicted += 1;
        }
        evicted
    }

    fn persist(&self, inner: &CacheInner) -> SyncResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut entries: Vec<CachedReferenceEntry> = inner.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.sequence);

        let tmp_path = path.with_file_name(CACHE_TMP_FILE);
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &CacheFile { entries })?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// One remote read kept warm.
#[derive(Clone, Debug, PartialEq)]
pub struct WarmTarget {
    pub collection: String,
    pub query: Query,
}

impl WarmTarget {
    pub fn new(collection: impl Into<String>, query: Query) -> Self {
        Self {
            collection: collection.into(),
            query,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::for_query(&self.collection, &self.query)
    }
}

/// Dictionaries plus the most recently updated players.
pub fn default_targets() -> Vec<WarmTarget> {
    vec![
        WarmTarget::new("positions", Query::new()),
        WarmTarget::new("leagues", Query::new()),
        WarmTarget::new("clubs", Query::new()),
        WarmTarget::new(
            "players",
            Query::new()
                .order(Order::desc("updated_at"))
                .limit(RECENT_PLAYERS),
        ),
    ]
}

/// Outcome of one warm-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub refreshed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Best-effort refresher of the reference cache.
///
/// Failures are logged and counted, never returned.
pub struct CacheWarmer<R> {
    remote: R,
    cache: Arc<ReferenceCache>,
    connectivity: ConnectivityMonitor,
    session: SessionContext,
    targets: Vec<WarmTarget>,
    profile_collection: String,
}

impl<R: RecordStore> CacheWarmer<R> {
    pub fn new(
        remote: R,
        cache: Arc<ReferenceCache>,
        connectivity: ConnectivityMonitor,
        session: SessionContext,
    ) -> Self {
        Self {
            remote,
            cache,
            connectivity,
            session,
            targets: default_targets(),
            profile_collection: "profiles".to_string(),
        }
    }

    /// Replace the static targets.
    pub fn with_targets(mut self, targets: Vec<WarmTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// Static targets plus the signed-in user's profile, if any.
    fn current_targets(&self) -> (Vec<WarmTarget>, usize) {
        let mut targets = self.targets.clone();
        match self.session.user() {
            Some(user) => {
                targets.push(WarmTarget::new(
                    self.profile_collection.clone(),
                    Query::by_id(user.id),
                ));
                (targets, 0)
            }
            None => (targets, 1),
        }
    }

    /// Refresh every target once.
    pub async fn warm(&self) -> WarmReport {
        let (targets, mut skipped) = self.current_targets();
        let mut report = WarmReport::default();

        if !self.connectivity.current_status() {
            tracing::debug!("Offline, skipping cache warm-up");
            report.skipped = skipped + targets.len();
            return report;
        }

        let mut remaining = targets.into_iter();
        for target in remaining.by_ref() {
            if !self.connectivity.current_status() {
                skipped += 1;
                break;
            }
            let key = target.key();
            match self.remote.select(&target.collection, &target.query).await {
                Ok(rows) => match self.cache.put(key.clone(), Value::Array(rows)) {
                    Ok(()) => report.refreshed += 1,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Could not store reference data");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Reference data refresh failed");
                    report.failed += 1;
                }
            }
        }
        report.skipped = skipped + remaining.count();
        tracing::debug!(
            refreshed = report.refreshed,
            failed = report.failed,
            skipped = report.skipped,
            "Cache warm-up finished"
        );
        report
    }
}

impl<R: RecordStore + 'static> CacheWarmer<R> {
    /// Warm every `interval` and on every reconnect until `shutdown` fires.
    pub fn spawn(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut online_rx = self.connectivity.watch();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("Cache warmer stopped");
                        break;
                    }
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *online_rx.borrow_and_update() {
                            self.warm().await;
                        }
                    }
                    _ = ticker.tick() => {
                        self.warm().await;
                    }
                }
            }
        })
    }
}
