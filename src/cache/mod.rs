//! Keyed fetch cache.
//!
//! The pieces, bottom-up:
//!
//! - **Key computation** ([`compute_key`]): turns a request key and options
//!   into a deterministic content hash, or [`ComputedKey::Skip`].
//! - **Store** ([`CacheStore`], [`reducer`]): loading markers, data and
//!   errors per hash, changed only through dispatched [`Action`]s.
//! - **Orchestration** ([`run_async`]): one fetch bracketed by `Loading` and
//!   a settle action.
//! - **Selection** ([`Selector`], [`Watch`]): per-hash observers that are
//!   only called back when their projection changes.
//! - **Facade** ([`FetchCache`]): wires the above to a [`Fetcher`] and a
//!   [`FetchClient`].
//!
//! ## Configuration
//!
//! The default HTTP client reads a `[client]` section:
//!
//! ```toml
//! [client]
//! user_agent = "fetchcache/0.1.0"
//! timeout_seconds = 30
//! headers = { accept = "application/json" }
//! ```

mod actions;
mod client;
mod config;
mod error;
mod fetcher;
mod hash;
mod http;
mod keys;
mod lock;
mod options;
mod orchestrator;
mod registry;
mod store;
mod subscription;

pub use actions::{
    ACTION_NAMESPACE, Action, CLEAR_ERROR, DELETE_DATA, ERROR, IS_LOADING, SET_DATA,
};
pub use client::{FetchCache, FetchCacheBuilder, FetchState, ServerFetchResult, is_loading};
pub use config::{ClientConfig, default_user_agent};
pub use error::{CacheError, FetchError, KeyError};
pub use fetcher::{
    ClientResponse, DefaultFetcher, FetchClient, FetchOutcome, Fetcher, Payload, headers_to_map,
};
pub use hash::content_hash;
pub use http::{BODY_FIELD, METHOD_FIELD, ReqwestFetchClient};
pub use keys::{ComputedKey, RequestKey, compute_key, is_falsy};
pub use options::{
    CONTROL_FIELDS, FetchOptions, HeaderSource, Headers, InitialData, KeyOptions,
    MapKeyToCacheKey, MapOptionsToKey, ResolvedOptions, ignore_headers_by_key,
    lowercase_header_names,
};
pub use orchestrator::{METRIC_FETCH_MS, METRIC_FETCH_TOTAL, Settled, run_async};
pub use registry::{EqualityChecker, Selector, Watch, default_equality_checker};
pub use store::{
    CacheState, CacheStore, Dispatch, METRIC_DISPATCH_TOTAL, SelectedValues, get_cache_by_key,
    reducer,
};
pub use subscription::{Notifier, Subscription};
