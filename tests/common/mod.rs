#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fetchcache::cache::{ClientResponse, FetchClient, FetchError, Headers, ResolvedOptions};
use serde_json::Value;

pub struct StaticResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

#[async_trait]
impl ClientResponse for StaticResponse {
    fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    async fn text(&mut self) -> Result<String, FetchError> {
        self.body
            .take()
            .ok_or_else(|| FetchError::body("body already read"))
    }
}

enum Route {
    Respond { status: u16, body: String },
    Refuse(String),
}

/// In-memory fetch client keyed by URL string.
#[derive(Clone, Default)]
pub struct FakeClient {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    calls: Arc<AtomicUsize>,
    seen_headers: Arc<Mutex<Vec<Headers>>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, status: u16, body: &str) -> Self {
        self.routes.lock().expect("routes lock").insert(
            url.to_string(),
            Route::Respond {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn refuse(self, url: &str, reason: &str) -> Self {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(url.to_string(), Route::Refuse(reason.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_headers(&self) -> Vec<Headers> {
        self.seen_headers.lock().expect("headers lock").clone()
    }
}

#[async_trait]
impl FetchClient for FakeClient {
    async fn fetch(
        &self,
        key: &Value,
        options: &ResolvedOptions,
    ) -> Result<Box<dyn ClientResponse>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_headers
            .lock()
            .expect("headers lock")
            .push(options.headers.clone().unwrap_or_default());

        let url = key.as_str().unwrap_or_default();
        let routes = self.routes.lock().expect("routes lock");
        match routes.get(url) {
            Some(Route::Respond { status, body }) => Ok(Box::new(StaticResponse {
                status: *status,
                headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                body: Some(body.clone()),
            })),
            Some(Route::Refuse(reason)) => Err(FetchError::transport(reason)),
            None => Ok(Box::new(StaticResponse {
                status: 404,
                headers: Vec::new(),
                body: Some("not found".to_string()),
            })),
        }
    }
}
