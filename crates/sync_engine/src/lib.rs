//! Background synchronization of queued scout writes.
//!
//! # Components
//!
//! - [`ConnectivityMonitor`]: one online/offline signal, one notification
//!   per transition, optionally fed by a periodic [`NetworkProbe`].
//! - [`SyncEngine`]: drains the [`offline_queue`] against a
//!   [`remote::RecordStore`] serially, in creation order, classifying each
//!   failure as transient, permanent or conflict.
//! - [`SyncScheduler`]: decides when passes run (reconnect, enqueue nudge,
//!   periodic tick) and backs off after failed passes.
//! - [`StatusPublisher`]: the [`SyncStatus`] projection pushed to subscribers.
//! - [`ReferenceCache`] / [`CacheWarmer`]: best-effort offline copies of
//!   reference data.
//! - [`OfflineClient`]: all of the above wired together.
//!
//! # Example
//!
//! ```
//! use offline_queue::{MemoryQueueStore, PendingOperation};
//! use remote::MemoryRecordStore;
//! use serde_json::json;
//! use sync_engine::{ConnectivityMonitor, StatusPublisher, StopReason, SyncConfig, SyncEngine};
//!
//! # tokio_test_block(async {
//! let remote = MemoryRecordStore::new();
//! let engine = SyncEngine::new(
//!     MemoryQueueStore::new(),
//!     remote.clone(),
//!     ConnectivityMonitor::new(true),
//!     StatusPublisher::new(),
//!     SyncConfig::default(),
//! )
//! .unwrap();
//!
//! engine.enqueue(PendingOperation::create_observation(json!({ "rating": 4 }))).unwrap();
//! let report = engine.sync_now().await;
//! assert_eq!(report.stop, StopReason::Completed);
//! assert_eq!(engine.status().pending_count, 0);
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod connectivity;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod status;

pub use cache::{
    default_targets, CacheConfig, CacheKey, CacheWarmer, CachedReferenceEntry, ReferenceCache,
    WarmReport, WarmTarget, DEFAULT_CACHE_CAPACITY,
};
pub use client::{ClientConfig, HttpSyncEngine, OfflineClient};
pub use connectivity::{ConnectivityMonitor, NetworkProbe, RemoteProbe};
pub use dispatch::{Collections, Submission};
pub use engine::{DrainReport, StopReason, SyncConfig, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use scheduler::SyncScheduler;
pub use status::{EngineState, StatusPublisher, SyncProgress, SyncStatus};
