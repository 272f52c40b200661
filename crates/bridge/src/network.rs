//! Network platform - fetch over real HTTP
//!
//! `fetch` goes through a `reqwest` client; every other capability is
//! answered by a local platform (in-memory by default). Any HTTP status is
//! a successful fetch; only transport failures become the sentinel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tracing::{debug, warn};

use crate::error::{CapabilityError, CapabilityResult};
use crate::platform::{FetchRequest, FetchResponse, HeadlessPlatform, Platform};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct NetworkPlatform {
    client: reqwest::Client,
    local: Arc<dyn Platform>,
}

impl NetworkPlatform {
    pub fn new() -> CapabilityResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Whole-request timeout, connect through body
    pub fn with_timeout(timeout: Duration) -> CapabilityResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::Network(e.to_string()))?;
        Ok(Self {
            client,
            local: HeadlessPlatform::new().into_shared(),
        })
    }

    /// Platform answering everything except fetch
    pub fn with_local(mut self, local: Arc<dyn Platform>) -> Self {
        self.local = local;
        self
    }

    pub fn into_shared(self) -> Arc<dyn Platform> {
        Arc::new(self)
    }
}

fn network_error(e: reqwest::Error) -> CapabilityError {
    CapabilityError::Network(e.to_string())
}

#[async_trait]
impl Platform for NetworkPlatform {
    async fn fetch(&self, request: FetchRequest) -> CapabilityResult<FetchResponse> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CapabilityError::InvalidData(format!("method {:?}", request.method)))?;
        debug!(%method, url = %request.url, "fetch");

        let mut builder = self.client.request(method, &request.url);
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, "fetch failed: {}", e);
            network_error(e)
        })?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(network_error)?;
        Ok(FetchResponse::new(status, body.to_vec()))
    }

    async fn kv_open(&self, db: &str, version: u32, stores: &[String]) -> CapabilityResult<()> {
        self.local.kv_open(db, version, stores).await
    }

    async fn kv_put(&self, store: &str, key: &str, value: Vec<u8>) -> CapabilityResult<()> {
        self.local.kv_put(store, key, value).await
    }

    async fn kv_get(&self, store: &str, key: &str) -> CapabilityResult<Option<Vec<u8>>> {
        self.local.kv_get(store, key).await
    }

    async fn kv_delete(&self, store: &str, key: &str) -> CapabilityResult<()> {
        self.local.kv_delete(store, key).await
    }

    async fn kv_close(&self) {
        self.local.kv_close().await
    }

    async fn clipboard_write(&self, text: String) -> CapabilityResult<()> {
        self.local.clipboard_write(text).await
    }

    async fn request_notification_permission(&self) -> CapabilityResult<bool> {
        self.local.request_notification_permission().await
    }

    async fn show_notification(&self, title: String, body: String) {
        self.local.show_notification(title, body).await
    }

    async fn push_subscribe(&self, vapid_key: Vec<u8>) -> CapabilityResult<String> {
        self.local.push_subscribe(vapid_key).await
    }

    async fn push_subscription(&self) -> CapabilityResult<Option<String>> {
        self.local.push_subscription().await
    }

    async fn push_unsubscribe(&self) -> CapabilityResult<bool> {
        self.local.push_unsubscribe().await
    }
}
