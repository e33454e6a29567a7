//! Notification channel.
//!
//! A flat listener list: `notify` calls every listener once. Listeners are
//! invoked outside the registry lock so they may subscribe or unsubscribe
//! from inside the callback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::lock::lock;

const OWNER: &str = "cache::subscription";

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Listener>>,
}

/// Shared notify/subscribe pair.
#[derive(Clone, Default)]
pub struct Notifier {
    inner: Arc<Listeners>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; it stays registered until the handle is dropped
    /// or [`Subscription::unsubscribe`] is called.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.entries, OWNER, "subscribe").insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner),
        }
    }

    /// Call every registered listener once.
    pub fn notify(&self) {
        let snapshot: Vec<Listener> = lock(&self.inner.entries, OWNER, "notify")
            .values()
            .cloned()
            .collect();
        for listener in snapshot {
            listener();
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.entries, OWNER, "listener_count").len()
    }
}

/// Registration handle returned by [`Notifier::subscribe`].
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    fn detach(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners.entries, OWNER, "unsubscribe").remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting(notifier: &Notifier) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let subscription = notifier.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (hits, subscription)
    }

    #[test]
    fn notify_reaches_every_listener_once() {
        let notifier = Notifier::new();
        let (first, _a) = counting(&notifier);
        let (second, _b) = counting(&notifier);

        notifier.notify();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let notifier = Notifier::new();
        let (hits, subscription) = counting(&notifier);
        assert_eq!(notifier.listener_count(), 1);

        subscription.unsubscribe();
        notifier.notify();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn listeners_may_subscribe_during_notify() {
        let notifier = Notifier::new();
        let late = Arc::new(Mutex::new(Vec::new()));
        let inner_notifier = notifier.clone();
        let sink = Arc::clone(&late);
        let _outer = notifier.subscribe(move || {
            let subscription = inner_notifier.subscribe(|| {});
            lock(&sink, "test", "push").push(subscription);
        });

        notifier.notify();

        assert_eq!(notifier.listener_count(), 2);
    }

    #[test]
    fn subscription_outliving_notifier_is_harmless() {
        let notifier = Notifier::new();
        let (_hits, subscription) = counting(&notifier);
        drop(notifier);
        drop(subscription);
    }
}
