//! Cache identity computation.
//!
//! Turns a request key plus options into a [`ComputedKey`]: either a resolved
//! key with a content hash, or [`ComputedKey::Skip`] when no request should
//! happen yet.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, trace};

use super::error::{CacheError, KeyError};
use super::hash::content_hash;
use super::options::{FetchOptions, KeyOptions, MAP_KEY_TO_CACHE_KEY_FIELD};

/// A request key, given directly or derived from the cache-relevant options.
#[derive(Clone)]
pub enum RequestKey {
    Static(Value),
    Dynamic(Arc<dyn Fn(&KeyOptions) -> Result<Value, KeyError> + Send + Sync>),
}

impl RequestKey {
    pub fn dynamic(
        key: impl Fn(&KeyOptions) -> Result<Value, KeyError> + Send + Sync + 'static,
    ) -> Self {
        Self::Dynamic(Arc::new(key))
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(key) => f.debug_tuple("Static").field(key).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<Value> for RequestKey {
    fn from(key: Value) -> Self {
        Self::Static(key)
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        Self::Static(Value::String(key.to_string()))
    }
}

impl From<String> for RequestKey {
    fn from(key: String) -> Self {
        Self::Static(Value::String(key))
    }
}

/// Outcome of key computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputedKey {
    /// No request: the key could not be resolved yet.
    Skip,
    Request { key: Value, hash: String },
}

impl ComputedKey {
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Skip => None,
            Self::Request { hash, .. } => Some(hash.as_str()),
        }
    }

    pub fn key(&self) -> Option<&Value> {
        match self {
            Self::Skip => None,
            Self::Request { key, .. } => Some(key),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// JavaScript-style falsiness over JSON values.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Compute the cache identity for a request.
///
/// Returns [`ComputedKey::Skip`] when a key function or key transform fails or
/// yields a falsy value. A `mapKeyToCacheKey` entry that is plain data rather
/// than a function is a programming error and is reported as such.
pub fn compute_key(key: &RequestKey, options: &FetchOptions) -> Result<ComputedKey, CacheError> {
    let resolved = options.resolve();
    let mapped = match &resolved.map_options_to_key {
        Some(map) => map(&resolved),
        None => KeyOptions::from_resolved(&resolved),
    };
    let key_options = mapped
        .without_control_fields()
        .with_lowercase_header_names();

    let request_key = match key {
        RequestKey::Static(value) => value.clone(),
        RequestKey::Dynamic(resolve) => match resolve(&key_options) {
            Ok(value) if !is_falsy(&value) => value,
            Ok(_) => {
                trace!("Key function returned a falsy key; skipping request");
                return Ok(ComputedKey::Skip);
            }
            Err(err) => {
                debug!(error = %err, "Key function failed; skipping request");
                return Ok(ComputedKey::Skip);
            }
        },
    };

    if key_options.fields.contains_key(MAP_KEY_TO_CACHE_KEY_FIELD) {
        return Err(CacheError::MapKeyToCacheKeyNotCallable);
    }

    let cache_key = match &key_options.map_key_to_cache_key {
        Some(map) => match map(&request_key, &key_options) {
            Ok(value) if !is_falsy(&value) => value,
            Ok(_) => return Ok(ComputedKey::Skip),
            Err(err) => {
                debug!(error = %err, "Cache key mapping failed; skipping request");
                return Ok(ComputedKey::Skip);
            }
        },
        None => request_key.clone(),
    };

    let hash = content_hash(&json!([cache_key, key_options.to_value()]));
    Ok(ComputedKey::Request {
        key: request_key,
        hash,
    })
}
