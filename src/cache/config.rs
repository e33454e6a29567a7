//! HTTP client configuration.
//!
//! Controls the default [`ReqwestFetchClient`](super::ReqwestFetchClient).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Settings for the reqwest-backed fetch client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Whole-request timeout; `0` disables it.
    pub timeout_seconds: u64,
    /// Sent with every request. Per-request headers with the same name win.
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent().to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            headers: BTreeMap::new(),
        }
    }
}

impl From<&crate::config::ClientSettings> for ClientConfig {
    fn from(settings: &crate::config::ClientSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout_seconds: settings.timeout.as_secs(),
            headers: settings.headers.clone(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

pub fn default_user_agent() -> &'static str {
    concat!("fetchcache/", env!("CARGO_PKG_VERSION"))
}
