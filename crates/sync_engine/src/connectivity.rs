//! Connectivity Monitor.
//!
//! Produces a single "online" signal. Subscribers are notified exactly once
//! per genuine transition; reporting the current state again is a no-op. A
//! monitor starts online unless told otherwise, so a platform without any
//! reachability signal degrades to optimistic behavior and relies on the
//! engine's own failure handling.

use remote::{RemoteError, RestClient, Subscribers, Subscription};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

struct MonitorInner {
    state: watch::Sender<bool>,
    /// Serializes transitions so notifications follow state order.
    transition: Mutex<()>,
    subscribers: Subscribers<bool>,
}

/// Shared online/offline signal. Cheap to clone.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            inner: Arc::new(MonitorInner {
                state,
                transition: Mutex::new(()),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub fn current_status(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Report the observed state. Returns whether it was a transition.
    ///
    /// Subscribers run synchronously before this returns; they must not
    /// call `set_online` themselves.
    pub fn set_online(&self, online: bool) -> bool {
        let _guard = self
            .inner
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
            self.inner.subscribers.publish(&online);
        }
        changed
    }

    /// Be notified of every transition with the new state.
    pub fn subscribe(&self, callback: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    /// Receiver that observes every transition; used by async tasks.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Poll `probe` every `interval` until `shutdown` fires.
    ///
    /// An indeterminate probe result leaves the state unchanged.
    pub fn spawn_probe<P>(
        &self,
        probe: P,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()>
    where
        P: NetworkProbe + 'static,
    {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("Reachability probe stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match probe.probe().await {
                            Some(online) => {
                                monitor.set_online(online);
                            }
                            None => tracing::debug!("Reachability unknown, keeping current state"),
                        }
                    }
                }
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Source of reachability observations.
#[trait_variant::make(Send)]
pub trait NetworkProbe: Send + Sync {
    /// `Some(reachable)`, or `None` when reachability cannot be determined.
    async fn probe(&self) -> Option<bool>;
}

/// Probe that asks the remote project whether it answers at all.
#[derive(Clone, Debug)]
pub struct RemoteProbe {
    client: RestClient,
}

impl RemoteProbe {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

impl NetworkProbe for RemoteProbe {
    async fn probe(&self) -> Option<bool> {
        match self.client.health_check().await {
            Ok(()) => Some(true),
            Err(RemoteError::Network(_) | RemoteError::Timeout) => Some(false),
            Err(e) => {
                tracing::warn!(error = %e, "Reachability probe inconclusive");
                None
            }
        }
    }
}
