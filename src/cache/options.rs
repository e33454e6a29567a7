//! Request options.
//!
//! Options travel through three shapes:
//!
//! - [`FetchOptions`]: what the caller supplies; headers may be a function.
//! - [`ResolvedOptions`]: header functions invoked, ready for the fetcher.
//! - [`KeyOptions`]: the caller's `map_options_to_key` output, reduced to the
//!   fields that take part in the cache identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::error::{FetchError, KeyError};
use super::fetcher::Payload;

/// Header names mapped to values.
pub type Headers = BTreeMap<String, String>;

/// Projects resolved options onto the options that should shape the cache key.
pub type MapOptionsToKey = Arc<dyn Fn(&ResolvedOptions) -> KeyOptions + Send + Sync>;

/// Derives the cache key from the resolved request key.
pub type MapKeyToCacheKey = Arc<dyn Fn(&Value, &KeyOptions) -> Result<Value, KeyError> + Send + Sync>;

/// Control entries that never take part in the cache identity.
pub const CONTROL_FIELDS: [&str; 4] = ["signal", "defer", "mapOptionsToKey", "initialData"];

/// Field name under which a key transform may (wrongly) appear as plain data.
pub(crate) const MAP_KEY_TO_CACHE_KEY_FIELD: &str = "mapKeyToCacheKey";

/// Static or lazily produced request headers.
#[derive(Clone)]
pub enum HeaderSource {
    Static(Headers),
    Dynamic(Arc<dyn Fn() -> Headers + Send + Sync>),
}

impl HeaderSource {
    pub fn dynamic(source: impl Fn() -> Headers + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(source))
    }

    /// Produce concrete headers, invoking the function form.
    pub fn resolve(&self) -> Headers {
        match self {
            Self::Static(headers) => headers.clone(),
            Self::Dynamic(source) => source(),
        }
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Seed values shown before the first fetch settles, e.g. from server rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialData {
    pub data: Option<Payload>,
    pub error: Option<FetchError>,
    pub loading: bool,
}

/// Caller-facing request options.
#[derive(Clone, Default)]
pub struct FetchOptions {
    pub headers: Option<HeaderSource>,
    pub map_options_to_key: Option<MapOptionsToKey>,
    pub map_key_to_cache_key: Option<MapKeyToCacheKey>,
    /// Skip the automatic fetch; the caller triggers `run` explicitly.
    pub defer: bool,
    pub initial_data: Option<InitialData>,
    /// Caller-defined fields. Anything here other than a control field is cache-relevant.
    pub extra: Map<String, Value>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(HeaderSource::Static(headers));
        self
    }

    pub fn dynamic_headers(mut self, source: impl Fn() -> Headers + Send + Sync + 'static) -> Self {
        self.headers = Some(HeaderSource::dynamic(source));
        self
    }

    pub fn map_options_to_key(
        mut self,
        map: impl Fn(&ResolvedOptions) -> KeyOptions + Send + Sync + 'static,
    ) -> Self {
        self.map_options_to_key = Some(Arc::new(map));
        self
    }

    pub fn map_key_to_cache_key(
        mut self,
        map: impl Fn(&Value, &KeyOptions) -> Result<Value, KeyError> + Send + Sync + 'static,
    ) -> Self {
        self.map_key_to_cache_key = Some(Arc::new(map));
        self
    }

    pub fn defer(mut self, defer: bool) -> Self {
        self.defer = defer;
        self
    }

    pub fn initial_data(mut self, initial_data: InitialData) -> Self {
        self.initial_data = Some(initial_data);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Invoke a function-valued header source; everything else passes through.
    pub fn resolve(&self) -> ResolvedOptions {
        ResolvedOptions {
            headers: self.headers.as_ref().map(HeaderSource::resolve),
            map_options_to_key: self.map_options_to_key.clone(),
            map_key_to_cache_key: self.map_key_to_cache_key.clone(),
            defer: self.defer,
            initial_data: self.initial_data.clone(),
            extra: self.extra.clone(),
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("headers", &self.headers)
            .field("map_options_to_key", &self.map_options_to_key.is_some())
            .field("map_key_to_cache_key", &self.map_key_to_cache_key.is_some())
            .field("defer", &self.defer)
            .field("initial_data", &self.initial_data)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Options with headers resolved to concrete values.
#[derive(Clone, Default)]
pub struct ResolvedOptions {
    pub headers: Option<Headers>,
    pub map_options_to_key: Option<MapOptionsToKey>,
    pub map_key_to_cache_key: Option<MapKeyToCacheKey>,
    pub defer: bool,
    pub initial_data: Option<InitialData>,
    pub extra: Map<String, Value>,
}

impl ResolvedOptions {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("headers", &self.headers)
            .field("defer", &self.defer)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Options after `map_options_to_key`; the input to hashing.
#[derive(Clone, Default)]
pub struct KeyOptions {
    pub headers: Option<Headers>,
    pub map_key_to_cache_key: Option<MapKeyToCacheKey>,
    pub fields: Map<String, Value>,
}

impl KeyOptions {
    /// The identity projection used when no `map_options_to_key` is supplied.
    pub fn from_resolved(resolved: &ResolvedOptions) -> Self {
        Self {
            headers: resolved.headers.clone(),
            map_key_to_cache_key: resolved.map_key_to_cache_key.clone(),
            fields: resolved.extra.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Drop control fields so they cannot influence the hash.
    pub fn without_control_fields(mut self) -> Self {
        for field in CONTROL_FIELDS {
            self.fields.remove(field);
        }
        self
    }

    /// Header names are case-insensitive; fold them before hashing.
    pub fn with_lowercase_header_names(mut self) -> Self {
        self.headers = self.headers.take().map(lowercase_header_names);
        self
    }

    /// JSON view of the cache-relevant options.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        if let Some(headers) = &self.headers {
            let headers = headers
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect();
            object.insert("headers".to_string(), Value::Object(headers));
        }
        Value::Object(object)
    }
}

impl fmt::Debug for KeyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOptions")
            .field("headers", &self.headers)
            .field("map_key_to_cache_key", &self.map_key_to_cache_key.is_some())
            .field("fields", &self.fields)
            .finish()
    }
}

pub fn lowercase_header_names(headers: Headers) -> Headers {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect()
}

/// Build a `map_options_to_key` that leaves the named headers out of the key.
///
/// Names compare case-insensitively. Useful for per-request headers such as
/// correlation ids that would otherwise give every request its own cache slot.
pub fn ignore_headers_by_key<I, S>(
    names: I,
) -> impl Fn(&ResolvedOptions) -> KeyOptions + Send + Sync + 'static
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ignored: Vec<String> = names
        .into_iter()
        .map(|name| name.into().to_ascii_lowercase())
        .collect();

    move |resolved: &ResolvedOptions| {
        let mut options = KeyOptions::from_resolved(resolved);
        options.headers = options.headers.take().map(|headers| {
            lowercase_header_names(headers)
                .into_iter()
                .filter(|(name, _)| !ignored.contains(name))
                .collect()
        });
        options
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn dynamic_headers_are_invoked_on_resolve() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let options = FetchOptions::new().dynamic_headers(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            headers(&[("Authorization", "Bearer abc")])
        });

        let resolved = options.resolve();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            resolved.headers,
            Some(headers(&[("Authorization", "Bearer abc")]))
        );
    }

    #[test]
    fn static_headers_pass_through() {
        let options = FetchOptions::new().headers(headers(&[("Accept", "text/plain")]));
        assert_eq!(
            options.resolve().headers,
            Some(headers(&[("Accept", "text/plain")]))
        );
        assert!(FetchOptions::new().resolve().headers.is_none());
    }

    #[test]
    fn control_fields_are_stripped() {
        let options = KeyOptions::default()
            .field("signal", "abort")
            .field("defer", true)
            .field("mapOptionsToKey", "nope")
            .field("initialData", json!({ "data": 1 }))
            .field("method", "POST")
            .without_control_fields();

        assert_eq!(options.fields.len(), 1);
        assert_eq!(options.get("method"), Some(&json!("POST")));
    }

    #[test]
    fn to_value_includes_headers_only_when_present() {
        let bare = KeyOptions::default().field("page", 2);
        assert_eq!(bare.to_value(), json!({ "page": 2 }));

        let with_headers = KeyOptions {
            headers: Some(headers(&[("accept", "json")])),
            ..Default::default()
        };
        assert_eq!(
            with_headers.to_value(),
            json!({ "headers": { "accept": "json" } })
        );
    }

    #[test]
    fn ignore_headers_by_key_drops_named_headers() {
        let map = ignore_headers_by_key(["X-Correlation-Id"]);
        let resolved = FetchOptions::new()
            .headers(headers(&[
                ("x-correlation-id", "123"),
                ("Accept", "application/json"),
            ]))
            .field("method", "GET")
            .resolve();

        let options = map(&resolved);

        assert_eq!(
            options.headers,
            Some(headers(&[("accept", "application/json")]))
        );
        assert_eq!(options.get("method"), Some(&json!("GET")));
    }

    #[test]
    fn ignore_headers_by_key_without_headers_is_identity() {
        let map = ignore_headers_by_key(["x-request-id"]);
        let options = map(&FetchOptions::new().field("page", 1).resolve());
        assert!(options.headers.is_none());
        assert_eq!(options.get("page"), Some(&json!(1)));
    }
}
