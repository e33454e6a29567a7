//! Hash-keyed observer registry.
//!
//! A [`Selector`] subscribes to the store once. On every notification it
//! recomputes the projection for each hash that has at least one watcher,
//! compares it with what that watcher last saw, and only calls back the
//! watchers whose projection changed.
//!
//! Callbacks are queued under the registry lock and delivered outside it by a
//! single drainer, so each watcher sees its changes in the order they were
//! observed, even when dispatches race or a callback dispatches again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use super::lock::lock;
use super::store::{CacheStore, SelectedValues, project};
use super::subscription::Subscription;

const OWNER: &str = "cache::registry";

/// Decides whether two projections are the same for notification purposes.
pub type EqualityChecker = Arc<dyn Fn(&SelectedValues, &SelectedValues) -> bool + Send + Sync>;

type Callback = Arc<dyn Fn(&SelectedValues) + Send + Sync>;

/// Field-wise structural equality.
pub fn default_equality_checker() -> EqualityChecker {
    Arc::new(|previous, next| previous == next)
}

struct Watcher {
    hash: Option<String>,
    last: SelectedValues,
    on_change: Callback,
}

struct Delivery {
    id: u64,
    on_change: Callback,
    values: SelectedValues,
}

/// Tracks watcher → hash and hash → watchers, plus undelivered callbacks.
#[derive(Default)]
struct Registry {
    watchers: HashMap<u64, Watcher>,
    by_hash: HashMap<String, HashSet<u64>>,
    pending: VecDeque<Delivery>,
    draining: bool,
}

impl Registry {
    fn register(&mut self, id: u64, watcher: Watcher) {
        if let Some(hash) = &watcher.hash {
            self.by_hash.entry(hash.clone()).or_default().insert(id);
        }
        self.watchers.insert(id, watcher);
    }

    fn unregister(&mut self, id: u64) -> Option<Watcher> {
        let watcher = self.watchers.remove(&id)?;
        if let Some(hash) = &watcher.hash {
            self.detach(id, hash);
        }
        Some(watcher)
    }

    fn detach(&mut self, id: u64, hash: &str) {
        if let Some(ids) = self.by_hash.get_mut(hash) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_hash.remove(hash);
            }
        }
    }

    fn hashes(&self) -> Vec<String> {
        self.by_hash.keys().cloned().collect()
    }

    fn enqueue(&mut self, id: u64, values: SelectedValues) {
        if let Some(watcher) = self.watchers.get(&id) {
            self.pending.push_back(Delivery {
                id,
                on_change: Arc::clone(&watcher.on_change),
                values,
            });
        }
    }

    /// Next delivery for a watcher that is still registered.
    fn next_delivery(&mut self) -> Option<Delivery> {
        while let Some(delivery) = self.pending.pop_front() {
            if self.watchers.contains_key(&delivery.id) {
                return Some(delivery);
            }
        }
        None
    }
}

struct SelectorInner {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    equality: EqualityChecker,
}

impl SelectorInner {
    fn check_for_updates(&self, store: &CacheStore) {
        let changed = {
            let mut registry = lock(&self.registry, OWNER, "check_for_updates");
            let hashes = registry.hashes();
            let projections: Vec<(String, SelectedValues)> = store.read_with(|state| {
                hashes
                    .into_iter()
                    .map(|hash| {
                        let next = project(state, &hash);
                        (hash, next)
                    })
                    .collect()
            });

            let mut changed = 0;
            for (hash, next) in projections {
                let ids = registry.by_hash.get(&hash).cloned().unwrap_or_default();
                for id in ids {
                    let Some(watcher) = registry.watchers.get_mut(&id) else {
                        continue;
                    };
                    if (self.equality)(&watcher.last, &next) {
                        continue;
                    }
                    watcher.last = next.clone();
                    registry.enqueue(id, next.clone());
                    changed += 1;
                }
            }
            changed
        };

        trace!(changed, "Selector checked watchers");
        self.deliver();
    }

    /// Run queued callbacks until the queue is empty.
    ///
    /// Only one caller drains at a time. A concurrent or nested caller leaves
    /// its deliveries to the active drainer and returns.
    fn deliver(&self) {
        {
            let mut registry = lock(&self.registry, OWNER, "deliver");
            if registry.draining {
                return;
            }
            registry.draining = true;
        }

        let _guard = DrainGuard(self);
        loop {
            let delivery = {
                let mut registry = lock(&self.registry, OWNER, "deliver");
                match registry.next_delivery() {
                    Some(delivery) => delivery,
                    None => {
                        registry.draining = false;
                        return;
                    }
                }
            };
            (delivery.on_change)(&delivery.values);
        }
    }
}

/// Releases the drainer role if a callback panics.
struct DrainGuard<'a>(&'a SelectorInner);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(&self.0.registry, OWNER, "deliver").draining = false;
        }
    }
}

/// Callers hold the registry lock, so no notification can slip between this
/// read and the watcher's registration.
fn project_optional(store: &CacheStore, hash: Option<&str>) -> SelectedValues {
    match hash {
        Some(hash) => store.read_with(|state| project(state, hash)),
        None => SelectedValues::default(),
    }
}

/// Equality-checked bridge between the store and per-hash observers.
pub struct Selector {
    store: Arc<CacheStore>,
    inner: Arc<SelectorInner>,
    _subscription: Subscription,
}

impl Selector {
    pub fn new(store: Arc<CacheStore>, equality: EqualityChecker) -> Self {
        let inner = Arc::new(SelectorInner {
            next_id: AtomicU64::new(0),
            registry: Mutex::new(Registry::default()),
            equality,
        });

        let weak_inner: Weak<SelectorInner> = Arc::downgrade(&inner);
        let weak_store: Weak<CacheStore> = Arc::downgrade(&store);
        let subscription = store.subscribe(move || {
            if let (Some(inner), Some(store)) = (weak_inner.upgrade(), weak_store.upgrade()) {
                inner.check_for_updates(&store);
            }
        });

        Self {
            store,
            inner,
            _subscription: subscription,
        }
    }

    /// Observe `hash`; `None` starts the watch unattached.
    ///
    /// `on_change` runs after a store notification changed the projection,
    /// and after [`Watch::set_hash`] switched to a hash whose projection
    /// differs from the one last seen.
    pub fn watch(
        &self,
        hash: Option<String>,
        on_change: impl Fn(&SelectedValues) + Send + Sync + 'static,
    ) -> Watch {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = lock(&self.inner.registry, OWNER, "watch");
            let last = project_optional(&self.store, hash.as_deref());
            registry.register(
                id,
                Watcher {
                    hash,
                    last,
                    on_change: Arc::new(on_change),
                },
            );
        }

        Watch {
            id,
            store: Arc::clone(&self.store),
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Number of distinct hashes with at least one watcher.
    pub fn observed_hashes(&self) -> usize {
        lock(&self.inner.registry, OWNER, "observed_hashes").by_hash.len()
    }

    pub fn watcher_count(&self) -> usize {
        lock(&self.inner.registry, OWNER, "watcher_count").watchers.len()
    }
}

/// A live view of one hash. Dropping it unregisters the watcher.
#[must_use = "dropping the watch stops observation"]
pub struct Watch {
    id: u64,
    store: Arc<CacheStore>,
    inner: Arc<SelectorInner>,
}

impl Watch {
    /// The projection this watcher last observed.
    pub fn current(&self) -> SelectedValues {
        lock(&self.inner.registry, OWNER, "current")
            .watchers
            .get(&self.id)
            .map(|watcher| watcher.last.clone())
            .unwrap_or_default()
    }

    pub fn hash(&self) -> Option<String> {
        lock(&self.inner.registry, OWNER, "hash")
            .watchers
            .get(&self.id)
            .and_then(|watcher| watcher.hash.clone())
    }

    /// Move the watcher to another hash, reading the store immediately.
    ///
    /// The previous hash's values are never carried over, even for one read.
    pub fn set_hash(&self, hash: Option<String>) {
        {
            let mut registry = lock(&self.inner.registry, OWNER, "set_hash");
            let Some(mut watcher) = registry.unregister(self.id) else {
                return;
            };
            if watcher.hash == hash {
                registry.register(self.id, watcher);
                return;
            }

            let next = project_optional(&self.store, hash.as_deref());
            let changed = !(self.inner.equality)(&watcher.last, &next);
            watcher.hash = hash;
            watcher.last = next.clone();
            registry.register(self.id, watcher);
            if changed {
                registry.enqueue(self.id, next);
            }
        }
        self.inner.deliver();
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        lock(&self.inner.registry, OWNER, "unwatch").unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::cache::actions::Action;
    use crate::cache::error::FetchError;
    use crate::cache::fetcher::Payload;
    use crate::cache::store::Dispatch;

    fn payload(body: serde_json::Value) -> Payload {
        Payload {
            body,
            ok: true,
            headers: BTreeMap::new(),
            status: 200,
        }
    }

    fn recording() -> (
        Arc<Mutex<Vec<SelectedValues>>>,
        impl Fn(&SelectedValues) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |values: &SelectedValues| {
            sink.lock().expect("test lock").push(values.clone());
        })
    }

    fn selector() -> (Arc<CacheStore>, Selector) {
        let store = Arc::new(CacheStore::new());
        let selector = Selector::new(Arc::clone(&store), default_equality_checker());
        (store, selector)
    }

    #[test]
    fn only_watchers_of_the_changed_hash_are_called() {
        let (store, selector) = selector();
        let (first_seen, first) = recording();
        let (second_seen, second) = recording();
        let _a = selector.watch(Some("a".to_string()), first);
        let _b = selector.watch(Some("b".to_string()), second);

        store.dispatch(Action::loading("a"));

        assert_eq!(first_seen.lock().expect("test lock").len(), 1);
        assert!(second_seen.lock().expect("test lock").is_empty());
    }

    #[test]
    fn unchanged_projection_does_not_call_back() {
        let (store, selector) = selector();
        let (seen, callback) = recording();
        let watch = selector.watch(Some("a".to_string()), callback);

        store.dispatch(Action::delete_data("a"));
        store.dispatch(Action::foreign("OTHER/x"));

        assert!(seen.lock().expect("test lock").is_empty());
        assert!(watch.current().is_idle());
    }

    #[test]
    fn current_tracks_settled_values() {
        let (store, selector) = selector();
        let watch = selector.watch(Some("a".to_string()), |_| {});

        store.dispatch(Action::loading("a"));
        assert!(watch.current().loading);

        store.dispatch(Action::set_data("a", payload(json!({ "id": 1 }))));
        let current = watch.current();
        assert!(!current.loading);
        assert_eq!(current.data, Some(payload(json!({ "id": 1 }))));
    }

    #[test]
    fn switching_hash_reads_the_new_entry_immediately() {
        let (store, selector) = selector();
        store.dispatch(Action::set_data("a", payload(json!("first"))));
        store.dispatch(Action::error("b", FetchError::Other("nope".to_string())));

        let (seen, callback) = recording();
        let watch = selector.watch(Some("a".to_string()), callback);
        assert_eq!(watch.current().data, Some(payload(json!("first"))));

        watch.set_hash(Some("b".to_string()));

        let current = watch.current();
        assert_eq!(current.data, None);
        assert_eq!(current.error, Some(FetchError::Other("nope".to_string())));
        assert_eq!(watch.hash().as_deref(), Some("b"));
        assert_eq!(seen.lock().expect("test lock").len(), 1);
    }

    #[test]
    fn unattached_watch_reads_nothing_and_ignores_notifications() {
        let (store, selector) = selector();
        store.dispatch(Action::set_data("a", payload(json!(1))));
        let (seen, callback) = recording();
        let watch = selector.watch(None, callback);

        assert!(watch.current().is_idle());
        assert_eq!(selector.observed_hashes(), 0);

        store.dispatch(Action::loading("a"));
        assert!(seen.lock().expect("test lock").is_empty());

        watch.set_hash(Some("a".to_string()));
        assert!(watch.current().loading);

        watch.set_hash(None);
        assert!(watch.current().is_idle());
        assert_eq!(selector.observed_hashes(), 0);
    }

    #[test]
    fn dropping_a_watch_unregisters_it() {
        let (store, selector) = selector();
        let (seen, callback) = recording();
        let watch = selector.watch(Some("a".to_string()), callback);
        assert_eq!(selector.watcher_count(), 1);

        drop(watch);
        store.dispatch(Action::loading("a"));

        assert_eq!(selector.watcher_count(), 0);
        assert_eq!(selector.observed_hashes(), 0);
        assert!(seen.lock().expect("test lock").is_empty());
    }

    #[test]
    fn custom_equality_can_suppress_loading_flips() {
        let store = Arc::new(CacheStore::new());
        let selector = Selector::new(
            Arc::clone(&store),
            Arc::new(|previous: &SelectedValues, next: &SelectedValues| {
                previous.data == next.data && previous.error == next.error
            }),
        );
        let (seen, callback) = recording();
        let _watch = selector.watch(Some("a".to_string()), callback);

        store.dispatch(Action::loading("a"));
        assert!(seen.lock().expect("test lock").is_empty());

        store.dispatch(Action::set_data("a", payload(json!(1))));
        assert_eq!(seen.lock().expect("test lock").len(), 1);
    }

    #[test]
    fn dispatch_from_a_callback_is_delivered_in_order() {
        let (store, selector) = selector();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reentrant = Arc::clone(&store);
        let _watch = selector.watch(Some("a".to_string()), move |values: &SelectedValues| {
            if values.loading {
                reentrant.dispatch(Action::set_data("a", payload(json!(1))));
            }
            sink.lock().expect("test lock").push(values.loading);
        });

        store.dispatch(Action::loading("a"));

        assert_eq!(*seen.lock().expect("test lock"), vec![true, false]);
    }

    #[test]
    fn dropped_watch_skips_queued_deliveries() {
        let (store, selector) = selector();
        let (seen, callback) = recording();
        let watch = Arc::new(Mutex::new(Some(selector.watch(Some("b".to_string()), callback))));
        let slot = Arc::clone(&watch);
        let reentrant = Arc::clone(&store);
        let _trigger = selector.watch(Some("a".to_string()), move |_: &SelectedValues| {
            reentrant.dispatch(Action::loading("b"));
            slot.lock().expect("test lock").take();
        });

        store.dispatch(Action::loading("a"));

        assert!(watch.lock().expect("test lock").is_none());
        assert!(seen.lock().expect("test lock").is_empty());
    }

    #[test]
    fn watch_registered_during_a_settle_never_goes_stale() {
        for _ in 0..200 {
            let (store, selector) = selector();
            store.dispatch(Action::loading("a"));

            let writer = Arc::clone(&store);
            let settle = std::thread::spawn(move || {
                writer.dispatch(Action::set_data("a", payload(json!(1))));
            });
            let watch = selector.watch(Some("a".to_string()), |_| {});
            settle.join().expect("settle thread");

            assert_eq!(
                watch.current(),
                store.select(Some("a")).expect("hash given")
            );
        }
    }

    #[test]
    fn watchers_sharing_a_hash_are_all_notified() {
        let (store, selector) = selector();
        let (first_seen, first) = recording();
        let (second_seen, second) = recording();
        let _a = selector.watch(Some("a".to_string()), first);
        let _b = selector.watch(Some("a".to_string()), second);
        assert_eq!(selector.observed_hashes(), 1);

        store.dispatch(Action::loading("a"));

        assert_eq!(first_seen.lock().expect("test lock").len(), 1);
        assert_eq!(second_seen.lock().expect("test lock").len(), 1);
    }
}
