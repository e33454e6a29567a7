//! Fetch orchestration.
//!
//! Brackets one fetch with a `Loading` dispatch and a settle dispatch, and
//! hands the settled values straight back to the caller.

use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{info, instrument};

use super::actions::Action;
use super::error::{CacheError, FetchError};
use super::fetcher::{FetchClient, FetchOutcome, Fetcher, Payload};
use super::keys::ComputedKey;
use super::options::FetchOptions;
use super::store::Dispatch;

pub const METRIC_FETCH_TOTAL: &str = "fetchcache_fetch_total";
pub const METRIC_FETCH_MS: &str = "fetchcache_fetch_ms";

/// What a fetch settled to, returned without waiting for store listeners.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settled {
    pub data: Option<Payload>,
    pub error: Option<FetchError>,
}

/// Run one fetch for `computed_key` and record the outcome through `dispatch`.
///
/// Returns `Ok(None)` without dispatching anything when the key is
/// [`ComputedKey::Skip`]. `Loading` is dispatched before the first await, so
/// it is visible as soon as the returned future is first polled.
pub async fn run_async(
    dispatch: &dyn Dispatch,
    computed_key: &ComputedKey,
    fetcher: &dyn Fetcher,
    client: &dyn FetchClient,
    options: &FetchOptions,
) -> Result<Option<Settled>, CacheError> {
    let ComputedKey::Request { key, hash } = computed_key else {
        return Ok(None);
    };

    dispatch.dispatch(Action::loading(hash.as_str()));
    settle(dispatch, key, hash, fetcher, client, options)
        .await
        .map(Some)
}

/// Fetch `key` for a hash already marked as loading and dispatch the result.
///
/// Header functions are resolved again here because the fetch may run long
/// after the key was computed. An outcome without an error settles as data,
/// even when it carries no payload.
///
/// A fetcher `Err` propagates unchanged. In that case no settle action is
/// dispatched and the hash stays marked as loading.
#[instrument(skip_all, fields(hash = hash))]
pub(crate) async fn settle(
    dispatch: &dyn Dispatch,
    key: &Value,
    hash: &str,
    fetcher: &dyn Fetcher,
    client: &dyn FetchClient,
    options: &FetchOptions,
) -> Result<Settled, CacheError> {
    let started_at = Instant::now();
    info!(key = %key, "Fetch starting");

    let resolved = options.resolve();
    let outcome = match fetcher.fetch(client, key, &resolved).await {
        Ok(outcome) => outcome,
        Err(err) => {
            counter!(METRIC_FETCH_TOTAL, "outcome" => "failed").increment(1);
            return Err(err);
        }
    };

    let FetchOutcome { payload, error } = outcome;
    let settled = match error {
        None => {
            dispatch.dispatch(Action::set_data(hash, payload.clone()));
            Settled {
                data: payload,
                error: None,
            }
        }
        Some(error) => {
            dispatch.dispatch(Action::error(hash, error.clone()));
            Settled {
                data: payload,
                error: Some(error),
            }
        }
    };

    let outcome = if settled.error.is_some() { "error" } else { "data" };
    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
    info!(key = %key, outcome, elapsed_ms, "Fetch settled");
    counter!(METRIC_FETCH_TOTAL, "outcome" => outcome).increment(1);
    histogram!(METRIC_FETCH_MS, "outcome" => outcome).record(elapsed_ms);

    Ok(settled)
}
