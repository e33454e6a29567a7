//! Normalised fetch state and the reducer that maintains it.
//!
//! [`reducer`] is a pure transition function. [`CacheStore`] owns the current
//! state, applies the reducer on every dispatch and then notifies listeners.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::actions::Action;
use super::error::{CacheError, FetchError};
use super::fetcher::Payload;
use super::lock::{read, write};
use super::subscription::{Notifier, Subscription};

const OWNER: &str = "cache::store";
pub const METRIC_DISPATCH_TOTAL: &str = "fetchcache_dispatch_total";

/// Three parallel maps keyed by request hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheState {
    pub errors: HashMap<String, FetchError>,
    /// Presence marks a fetch in flight; the value is the hash itself.
    pub loading: HashMap<String, String>,
    /// Presence marks a settled fetch, even one that produced no payload.
    pub data: HashMap<String, Option<Payload>>,
}

/// Per-hash projection of [`CacheState`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedValues {
    pub data: Option<Payload>,
    pub loading: bool,
    pub error: Option<FetchError>,
}

impl SelectedValues {
    /// Nothing cached and nothing in flight.
    pub fn is_idle(&self) -> bool {
        !self.loading && self.data.is_none() && self.error.is_none()
    }
}

/// Apply `action` to `state`, starting from the empty state when `None`.
///
/// Actions outside the namespace, and unknown namespaced ones, return the
/// state untouched.
pub fn reducer(state: Option<CacheState>, action: &Action) -> CacheState {
    let mut state = state.unwrap_or_default();
    if !action.is_namespaced() {
        return state;
    }

    match action {
        Action::Loading { hash } => {
            state.loading.insert(hash.clone(), hash.clone());
        }
        Action::SetData { hash, value } => {
            state.loading.remove(hash);
            state.errors.remove(hash);
            state.data.insert(hash.clone(), value.clone());
        }
        Action::Error { hash, error } => {
            state.loading.remove(hash);
            state.data.remove(hash);
            state.errors.insert(hash.clone(), error.clone());
        }
        Action::DeleteData { hash } => {
            state.data.remove(hash);
        }
        Action::ClearError { hash } => {
            state.errors.remove(hash);
        }
        Action::Foreign { .. } => {}
    }
    state
}

/// Read the projection for `hash`.
///
/// Reading without a hash is a caller bug and fails rather than returning an
/// empty projection.
pub fn get_cache_by_key(state: &CacheState, hash: Option<&str>) -> Result<SelectedValues, CacheError> {
    let hash = hash.ok_or(CacheError::MissingKey)?;
    Ok(project(state, hash))
}

pub(crate) fn project(state: &CacheState, hash: &str) -> SelectedValues {
    SelectedValues {
        data: state.data.get(hash).cloned().flatten(),
        loading: state.loading.contains_key(hash),
        error: state.errors.get(hash).cloned(),
    }
}

/// Anything that accepts store actions.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, action: Action);
}

impl<F> Dispatch for F
where
    F: Fn(Action) + Send + Sync,
{
    fn dispatch(&self, action: Action) {
        self(action)
    }
}

/// The single mutable cell holding cache state.
///
/// Every dispatch runs the reducer under the write lock, releases it, and
/// then fires exactly one notification. Readers always see the latest
/// settled state, including from inside async continuations.
#[derive(Default)]
pub struct CacheStore {
    state: RwLock<CacheState>,
    notifier: Notifier,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously captured state, e.g. handed over from a server render.
    pub fn with_state(state: CacheState) -> Self {
        Self {
            state: RwLock::new(state),
            notifier: Notifier::new(),
        }
    }

    pub fn snapshot(&self) -> CacheState {
        read(&self.state, OWNER, "snapshot").clone()
    }

    pub fn select(&self, hash: Option<&str>) -> Result<SelectedValues, CacheError> {
        get_cache_by_key(&read(&self.state, OWNER, "select"), hash)
    }

    /// Run `f` against the current state under the read lock.
    pub fn read_with<R>(&self, f: impl FnOnce(&CacheState) -> R) -> R {
        f(&read(&self.state, OWNER, "read_with"))
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.notifier.subscribe(listener)
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

impl Dispatch for CacheStore {
    fn dispatch(&self, action: Action) {
        let started_at = Instant::now();
        {
            let mut state = write(&self.state, OWNER, "dispatch");
            let current = std::mem::take(&mut *state);
            *state = reducer(Some(current), &action);
        }
        debug!(
            action = action.action_type(),
            hash = action.hash().unwrap_or_default(),
            elapsed_us = started_at.elapsed().as_micros() as u64,
            "Cache action applied"
        );
        counter!(METRIC_DISPATCH_TOTAL, "action" => action.action_type().to_string()).increment(1);
        self.notifier.notify();
    }
}
