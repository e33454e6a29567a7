//! Pluggable transport seams.
//!
//! A [`FetchClient`] performs the raw request. A [`Fetcher`] drives a client
//! and folds the outcome into a [`FetchOutcome`], capturing transport failures
//! as data so they can be stored in the cache.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use super::error::{CacheError, FetchError};
use super::options::ResolvedOptions;

/// Settled response stored in the cache on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Parsed JSON, or the raw text when the body is not JSON.
    pub body: Value,
    pub ok: bool,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
}

/// Result of a fetcher: exactly one side is expected to be populated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub payload: Option<Payload>,
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    pub fn success(payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: FetchError) -> Self {
        Self {
            payload: None,
            error: Some(error),
        }
    }
}

/// A response whose body has not been read yet.
#[async_trait]
pub trait ClientResponse: Send {
    fn ok(&self) -> bool;

    fn status(&self) -> u16;

    fn headers(&self) -> Vec<(String, String)>;

    /// Read the full body. Called at most once per response.
    async fn text(&mut self) -> Result<String, FetchError>;
}

/// Raw transport. Must fail on transport errors rather than return a response.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(
        &self,
        key: &Value,
        options: &ResolvedOptions,
    ) -> Result<Box<dyn ClientResponse>, FetchError>;
}

/// Turns a client call into a [`FetchOutcome`].
///
/// An `Err` is an orchestration failure: it is not stored in the cache and
/// propagates to whoever started the fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        client: &dyn FetchClient,
        key: &Value,
        options: &ResolvedOptions,
    ) -> Result<FetchOutcome, CacheError>;
}

/// Reads the whole body, parses JSON when possible and never returns `Err`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFetcher;

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(
        &self,
        client: &dyn FetchClient,
        key: &Value,
        options: &ResolvedOptions,
    ) -> Result<FetchOutcome, CacheError> {
        match read_payload(client, key, options).await {
            Ok(payload) => Ok(FetchOutcome::success(payload)),
            Err(err) => {
                error!(key = %key, error = %err, "Request failed");
                Ok(FetchOutcome::failure(err))
            }
        }
    }
}

async fn read_payload(
    client: &dyn FetchClient,
    key: &Value,
    options: &ResolvedOptions,
) -> Result<Payload, FetchError> {
    let mut response = client.fetch(key, options).await?;
    let ok = response.ok();
    let status = response.status();
    let headers = headers_to_map(response.headers());
    let text = response.text().await?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    Ok(Payload {
        body,
        ok,
        headers,
        status,
    })
}

/// Collapse header pairs into a map; a repeated name keeps its last value.
pub fn headers_to_map<I, K, V>(pairs: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}
