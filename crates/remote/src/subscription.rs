//! Publish/subscribe primitive with unsubscribe handles.
//!
//! Callbacks run synchronously on the publishing thread, outside the
//! subscriber lock, so a callback may subscribe or unsubscribe freely.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SubscriberList<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

impl<T> SubscriberList<T> {
    fn remove(&mut self, id: u64) {
        self.callbacks.retain(|(cb_id, _)| *cb_id != id);
    }
}

fn lock<T>(list: &Mutex<SubscriberList<T>>) -> MutexGuard<'_, SubscriberList<T>> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A set of callbacks interested in events of type `T`.
pub struct Subscribers<T> {
    list: Arc<Mutex<SubscriberList<T>>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            list: Arc::new(Mutex::new(SubscriberList {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Register `callback`. It stays registered until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let mut list = lock(&self.list);
        let id = list.next_id;
        list.next_id += 1;
        list.callbacks.push((id, Arc::new(callback)));

        let weak: Weak<Mutex<SubscriberList<T>>> = Arc::downgrade(&self.list);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    lock(&list).remove(id);
                }
            })),
        }
    }

    /// Deliver `event` to every current subscriber, in subscription order.
    pub fn publish(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.list)
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        lock(&self.list).callbacks.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.list).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that removes its callback when unsubscribed or dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_publish_reaches_subscribers() {
        let subscribers: Subscribers<u32> = Subscribers::new();
        let total = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&total);
        let _sub = subscribers.subscribe(move |n| {
            seen.fetch_add(*n as usize, Ordering::SeqCst);
        });

        subscribers.publish(&2);
        subscribers.publish(&3);
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_unsubscribe_and_drop_remove_callback() {
        let subscribers: Subscribers<()> = Subscribers::new();
        let first = subscribers.subscribe(|_| {});
        let second = subscribers.subscribe(|_| {});
        assert_eq!(subscribers.len(), 2);

        first.unsubscribe();
        assert_eq!(subscribers.len(), 1);
        drop(second);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_subscription_outliving_list() {
        let subscribers: Subscribers<()> = Subscribers::new();
        let sub = subscribers.subscribe(|_| {});
        drop(subscribers);
        sub.unsubscribe();
    }

    #[test]
    fn test_callback_may_subscribe_during_publish() {
        let subscribers: Arc<Subscribers<()>> = Arc::new(Subscribers::new());
        let inner = Arc::clone(&subscribers);
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in_cb = Arc::clone(&held);
        let _sub = subscribers.subscribe(move |_| {
            let sub = inner.subscribe(|_| {});
            held_in_cb.lock().unwrap().push(sub);
        });

        subscribers.publish(&());
        assert_eq!(subscribers.len(), 2);
    }
}
