//! Default fetch client backed by `reqwest`.

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::config::ClientConfig;
use super::error::FetchError;
use super::fetcher::{ClientResponse, FetchClient};
use super::options::{Headers, ResolvedOptions, lowercase_header_names};

/// Extension-map entry selecting the HTTP method.
pub const METHOD_FIELD: &str = "method";
/// Extension-map entry carrying the request body.
pub const BODY_FIELD: &str = "body";

/// Sends the request key, which must be an absolute URL string.
///
/// A string `body` entry is sent verbatim; any other JSON value is sent as a
/// JSON document.
#[derive(Debug, Clone)]
pub struct ReqwestFetchClient {
    client: Client,
    default_headers: Headers,
}

impl ReqwestFetchClient {
    pub fn new(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().user_agent(config.user_agent.as_str());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            default_headers: config.headers.clone(),
        })
    }

    fn url(key: &Value) -> Result<Url, FetchError> {
        let raw = key
            .as_str()
            .ok_or_else(|| FetchError::Other(format!("request key must be a URL string, got {key}")))?;
        Url::parse(raw).map_err(|err| FetchError::Other(format!("invalid URL {raw}: {err}")))
    }

    fn method(options: &ResolvedOptions) -> Result<Method, FetchError> {
        match options.get(METHOD_FIELD) {
            None | Some(Value::Null) => Ok(Method::GET),
            Some(Value::String(name)) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|err| FetchError::Other(format!("invalid method {name}: {err}"))),
            Some(other) => Err(FetchError::Other(format!("invalid method {other}"))),
        }
    }

    /// Defaults first, then request headers; names are folded to lowercase
    /// so a request header replaces a default regardless of casing.
    fn headers(&self, options: &ResolvedOptions) -> Headers {
        let mut headers = lowercase_header_names(self.default_headers.clone());
        if let Some(request_headers) = &options.headers {
            headers.extend(lowercase_header_names(request_headers.clone()));
        }
        headers
    }
}

#[async_trait]
impl FetchClient for ReqwestFetchClient {
    async fn fetch(
        &self,
        key: &Value,
        options: &ResolvedOptions,
    ) -> Result<Box<dyn ClientResponse>, FetchError> {
        let url = Self::url(key)?;
        let method = Self::method(options)?;
        debug!(%url, %method, "Sending request");

        let mut request = self.client.request(method, url);
        for (name, value) in self.headers(options) {
            request = request.header(name, value);
        }
        request = match options.get(BODY_FIELD) {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(document) => request.json(document),
        };

        let response = request.send().await.map_err(FetchError::transport)?;
        Ok(Box::new(ReqwestResponse {
            response: Some(response),
        }))
    }
}

struct ReqwestResponse {
    response: Option<Response>,
}

#[async_trait]
impl ClientResponse for ReqwestResponse {
    fn ok(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(|response| response.status().is_success())
    }

    fn status(&self) -> u16 {
        self.response
            .as_ref()
            .map_or(0, |response| response.status().as_u16())
    }

    fn headers(&self) -> Vec<(String, String)> {
        let Some(response) = &self.response else {
            return Vec::new();
        };
        response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }

    async fn text(&mut self) -> Result<String, FetchError> {
        let response = self
            .response
            .take()
            .ok_or_else(|| FetchError::body("response body already consumed"))?;
        response.text().await.map_err(FetchError::body)
    }
}
