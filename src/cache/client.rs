//! The [`FetchCache`] facade.
//!
//! Bundles a store, a selector, a fetcher and a fetch client so callers do
//! not have to thread them through every call. Nothing here is global: each
//! `FetchCache` is an independent cache.

use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{error, instrument};

use super::actions::Action;
use super::config::ClientConfig;
use super::error::{CacheError, FetchError};
use super::fetcher::{DefaultFetcher, FetchClient, Fetcher, Payload};
use super::http::ReqwestFetchClient;
use super::keys::{ComputedKey, RequestKey, compute_key};
use super::options::FetchOptions;
use super::orchestrator::{Settled, run_async, settle};
use super::registry::{EqualityChecker, Selector, Watch, default_equality_checker};
use super::store::{CacheState, CacheStore, Dispatch, SelectedValues};

/// What a caller renders for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchState {
    pub data: Option<Payload>,
    pub error: Option<FetchError>,
    pub is_loading: bool,
}

/// Result of [`FetchCache::server_fetch`]; absent values serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerFetchResult {
    pub data: Option<Payload>,
    pub error: Option<FetchError>,
}

impl From<Settled> for ServerFetchResult {
    fn from(settled: Settled) -> Self {
        Self {
            data: settled.data,
            error: settled.error,
        }
    }
}

/// Whether a request should be presented as loading.
///
/// `data` is the value the caller will show, seed data included.
pub fn is_loading(
    selected: &SelectedValues,
    data: Option<&Payload>,
    computed_key: &ComputedKey,
    defer: bool,
) -> bool {
    selected.loading
        || (!defer && !computed_key.is_skip() && data.is_none() && selected.error.is_none())
}

/// Builder for [`FetchCache`].
#[derive(Default)]
pub struct FetchCacheBuilder {
    state: Option<CacheState>,
    fetcher: Option<Arc<dyn Fetcher>>,
    client: Option<Arc<dyn FetchClient>>,
    client_config: Option<ClientConfig>,
    equality: Option<EqualityChecker>,
}

impl FetchCacheBuilder {
    /// Seed the store, e.g. with state captured during a server render.
    pub fn initial_state(mut self, state: CacheState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn fetch_client(mut self, client: impl FetchClient + 'static) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Configure the default reqwest client. Ignored when a fetch client is set.
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = Some(config);
        self
    }

    pub fn equality_checker(mut self, equality: EqualityChecker) -> Self {
        self.equality = Some(equality);
        self
    }

    pub fn build(self) -> Result<FetchCache, CacheError> {
        let client: Arc<dyn FetchClient> = match self.client {
            Some(client) => client,
            None => Arc::new(ReqwestFetchClient::new(
                &self.client_config.unwrap_or_default(),
            )?),
        };
        let store = Arc::new(match self.state {
            Some(state) => CacheStore::with_state(state),
            None => CacheStore::new(),
        });
        let selector = Selector::new(
            Arc::clone(&store),
            self.equality.unwrap_or_else(default_equality_checker),
        );

        Ok(FetchCache {
            inner: Arc::new(Inner {
                store,
                selector,
                fetcher: self.fetcher.unwrap_or_else(|| Arc::new(DefaultFetcher)),
                client,
            }),
        })
    }
}

struct Inner {
    store: Arc<CacheStore>,
    selector: Selector,
    fetcher: Arc<dyn Fetcher>,
    client: Arc<dyn FetchClient>,
}

/// A keyed fetch cache with request de-duplication.
///
/// Cloning is cheap and every clone shares the same store.
#[derive(Clone)]
pub struct FetchCache {
    inner: Arc<Inner>,
}

impl FetchCache {
    pub fn builder() -> FetchCacheBuilder {
        FetchCacheBuilder::default()
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    pub fn selector(&self) -> &Selector {
        &self.inner.selector
    }

    /// Copy of the whole cache, suitable for seeding another instance.
    pub fn snapshot(&self) -> CacheState {
        self.inner.store.snapshot()
    }

    pub fn dispatch(&self, action: Action) {
        self.inner.store.dispatch(action);
    }

    /// Read the cache for a request and start a background fetch if needed.
    ///
    /// A fetch starts only when the request is not deferred, its key
    /// resolves, no `initial_data.data` was supplied, and the cache holds
    /// neither data, an error, nor an in-flight marker for its hash. The
    /// in-flight marker is set before this returns, so an immediate second
    /// call for the same request does not fetch again. The fetch itself runs
    /// on the current tokio runtime; follow it with [`FetchCache::watch`] or
    /// call again later.
    pub fn fetch(&self, key: &RequestKey, options: &FetchOptions) -> Result<FetchState, CacheError> {
        let computed = compute_key(key, options)?;
        let selected = match computed.hash() {
            Some(hash) => self.inner.store.select(Some(hash))?,
            None => SelectedValues::default(),
        };
        let seed = options.initial_data.as_ref();
        let has_seed_data = seed.is_some_and(|seed| seed.data.is_some());

        if !options.defer && !computed.is_skip() && !has_seed_data && selected.is_idle() {
            self.spawn_fetch(&computed, options.clone())?;
        }

        let data = selected
            .data
            .clone()
            .or_else(|| seed.and_then(|seed| seed.data.clone()));
        let error = selected
            .error
            .clone()
            .or_else(|| seed.and_then(|seed| seed.error.clone()));
        let is_loading = is_loading(&selected, data.as_ref(), &computed, options.defer);

        Ok(FetchState {
            data,
            error,
            is_loading,
        })
    }

    /// Recompute the key and fetch unconditionally.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        key: &RequestKey,
        options: &FetchOptions,
    ) -> Result<Option<Settled>, CacheError> {
        let computed = compute_key(key, options)?;
        run_async(
            self.inner.store.as_ref(),
            &computed,
            self.inner.fetcher.as_ref(),
            self.inner.client.as_ref(),
            options,
        )
        .await
    }

    /// Resolve a request to settled values, fetching only on a cache miss.
    ///
    /// An entry that is loading, settled with data, or settled with an error
    /// counts as a hit and is returned as is. A key that resolves to nothing
    /// has no hash to read and fails with [`CacheError::MissingKey`].
    #[instrument(skip_all)]
    pub async fn server_fetch(
        &self,
        key: &RequestKey,
        options: &FetchOptions,
    ) -> Result<ServerFetchResult, CacheError> {
        let computed = compute_key(key, options)?;
        let selected = self.inner.store.select(computed.hash())?;
        if !selected.is_idle() {
            return Ok(ServerFetchResult {
                data: selected.data,
                error: selected.error,
            });
        }

        let settled = run_async(
            self.inner.store.as_ref(),
            &computed,
            self.inner.fetcher.as_ref(),
            self.inner.client.as_ref(),
            options,
        )
        .await?;
        Ok(settled.map(ServerFetchResult::from).unwrap_or_default())
    }

    /// Observe the cache entry for a request.
    pub fn watch(
        &self,
        key: &RequestKey,
        options: &FetchOptions,
        on_change: impl Fn(&SelectedValues) + Send + Sync + 'static,
    ) -> Result<Watch, CacheError> {
        let computed = compute_key(key, options)?;
        Ok(self
            .inner
            .selector
            .watch(computed.hash().map(str::to_string), on_change))
    }

    /// Mark the hash as loading on the caller's thread, then fetch in a task.
    fn spawn_fetch(&self, computed: &ComputedKey, options: FetchOptions) -> Result<(), CacheError> {
        let ComputedKey::Request { key, hash } = computed else {
            return Ok(());
        };
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        self.inner.store.dispatch(Action::loading(hash.as_str()));

        let inner = Arc::clone(&self.inner);
        let (key, hash) = (key.clone(), hash.clone());
        runtime.spawn(async move {
            let result = settle(
                inner.store.as_ref(),
                &key,
                &hash,
                inner.fetcher.as_ref(),
                inner.client.as_ref(),
                &options,
            )
            .await;
            if let Err(err) = result {
                error!(hash = %hash, error = %err, "Background fetch failed");
            }
        });
        Ok(())
    }
}
