use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by the cache engine itself.
///
/// Key-resolution problems are not errors: they degrade to
/// [`ComputedKey::Skip`](super::ComputedKey::Skip). Only programming mistakes
/// and orchestration-level failures surface here.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("a cache key must be provided to read cache state")]
    MissingKey,
    #[error("mapKeyToCacheKey must be a function")]
    MapKeyToCacheKeyNotCallable,
    #[error("fetcher failed: {message}")]
    Fetcher { message: String },
    #[error("no tokio runtime is available to run the fetch")]
    NoRuntime,
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl CacheError {
    pub fn fetcher(message: impl Display) -> Self {
        Self::Fetcher {
            message: message.to_string(),
        }
    }
}

/// Raised by caller-supplied key functions and key transforms.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct KeyError {
    message: String,
}

impl KeyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure captured by a fetcher and stored as cache state.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn transport(err: impl Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn body(err: impl Display) -> Self {
        Self::Body(err.to_string())
    }
}
