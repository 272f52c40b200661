//! Platform - the asynchronous host capabilities behind the resolver
//!
//! The bridge never performs I/O itself. Each capability is one async call
//! on a `Platform`; the resolver runs it on a tokio task and turns the
//! outcome into a `Completion`.
//!
//! `HeadlessPlatform` is the in-memory implementation used by tests,
//! examples and headless embeddings.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CapabilityError, CapabilityResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body: None,
            content_type: None,
        }
    }

    pub fn json(url: impl Into<String>, method: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Some(body.into()),
            content_type: Some("application/json".to_string()),
            ..Self::new(url, method)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Host capability provider
///
/// Every method is called from a spawned task, never from inside a guest
/// call. Errors become the completion's sentinel.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> CapabilityResult<FetchResponse>;

    async fn kv_open(&self, db: &str, version: u32, stores: &[String]) -> CapabilityResult<()>;
    async fn kv_put(&self, store: &str, key: &str, value: Vec<u8>) -> CapabilityResult<()>;
    async fn kv_get(&self, store: &str, key: &str) -> CapabilityResult<Option<Vec<u8>>>;
    async fn kv_delete(&self, store: &str, key: &str) -> CapabilityResult<()>;
    async fn kv_close(&self);

    async fn clipboard_write(&self, text: String) -> CapabilityResult<()>;

    async fn request_notification_permission(&self) -> CapabilityResult<bool>;
    /// Display a notification. Dropped without error when permission is
    /// not granted.
    async fn show_notification(&self, title: String, body: String);

    /// Subscribe to push; resolves to the subscription as JSON
    async fn push_subscribe(&self, vapid_key: Vec<u8>) -> CapabilityResult<String>;
    async fn push_subscription(&self) -> CapabilityResult<Option<String>>;
    async fn push_unsubscribe(&self) -> CapabilityResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct KvDatabase {
    name: String,
    version: u32,
    stores: DashMap<String, DashMap<String, Vec<u8>>>,
}

/// In-memory platform
///
/// Fetch answers come from static routes keyed by `"METHOD url"`; unknown
/// routes fail like a network error. The key-value database, clipboard,
/// notifications and push subscription all live in process memory.
#[derive(Default)]
pub struct HeadlessPlatform {
    routes: DashMap<String, FetchResponse>,
    fetches: AtomicUsize,
    database: RwLock<Option<KvDatabase>>,
    database_open: AtomicBool,
    clipboard: RwLock<Option<String>>,
    clipboard_denied: AtomicBool,
    permission: AtomicBool,
    notifications: RwLock<Vec<Notification>>,
    subscription: RwLock<Option<String>>,
    push_endpoint: Option<String>,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method url` with a fixed response
    pub fn with_route(self, method: &str, url: &str, response: FetchResponse) -> Self {
        self.routes.insert(route_key(method, url), response);
        self
    }

    pub fn with_notification_permission(self, granted: bool) -> Self {
        self.permission.store(granted, Ordering::SeqCst);
        self
    }

    /// Make clipboard writes fail
    pub fn with_clipboard_denied(self) -> Self {
        self.clipboard_denied.store(true, Ordering::SeqCst);
        self
    }

    /// Endpoint reported by push subscriptions
    pub fn with_push_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.push_endpoint = Some(endpoint.into());
        self
    }

    pub fn into_shared(self) -> Arc<dyn Platform> {
        Arc::new(self)
    }

    pub async fn clipboard(&self) -> Option<String> {
        self.clipboard.read().await.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }

    /// Number of fetches issued so far
    pub fn request_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Name and version of the open database
    pub async fn open_database(&self) -> Option<(String, u32)> {
        self.database
            .read()
            .await
            .as_ref()
            .map(|db| (db.name.clone(), db.version))
    }
}

fn route_key(method: &str, url: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), url)
}

#[async_trait]
impl Platform for HeadlessPlatform {
    async fn fetch(&self, request: FetchRequest) -> CapabilityResult<FetchResponse> {
        let key = route_key(&request.method, &request.url);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        debug!(%key, body = request.body.as_ref().map_or(0, Vec::len), "fetch");
        match self.routes.get(&key) {
            Some(response) => Ok(response.value().clone()),
            None => Err(CapabilityError::Network(format!("no route for {}", key))),
        }
    }

    async fn kv_open(&self, db: &str, version: u32, stores: &[String]) -> CapabilityResult<()> {
        let mut database = self.database.write().await;
        // Re-opening keeps existing data and adds any new stores
        let current = database.get_or_insert_with(|| KvDatabase {
            name: db.to_string(),
            ..Default::default()
        });
        current.version = current.version.max(version);
        for store in stores {
            current.stores.entry(store.clone()).or_default();
        }
        self.database_open.store(true, Ordering::SeqCst);
        debug!(db, version, stores = stores.len(), "kv open");
        Ok(())
    }

    async fn kv_put(&self, store: &str, key: &str, value: Vec<u8>) -> CapabilityResult<()> {
        if !self.database_open.load(Ordering::SeqCst) {
            return Err(CapabilityError::NotOpen);
        }
        let database = self.database.read().await;
        let db = database.as_ref().ok_or(CapabilityError::NotOpen)?;
        let entries = db
            .stores
            .get(store)
            .ok_or_else(|| CapabilityError::UnknownStore(store.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn kv_get(&self, store: &str, key: &str) -> CapabilityResult<Option<Vec<u8>>> {
        if !self.database_open.load(Ordering::SeqCst) {
            return Err(CapabilityError::NotOpen);
        }
        let database = self.database.read().await;
        let db = database.as_ref().ok_or(CapabilityError::NotOpen)?;
        let entries = db
            .stores
            .get(store)
            .ok_or_else(|| CapabilityError::UnknownStore(store.to_string()))?;
        let value = entries.get(key).map(|value| value.value().clone());
        Ok(value)
    }

    async fn kv_delete(&self, store: &str, key: &str) -> CapabilityResult<()> {
        if !self.database_open.load(Ordering::SeqCst) {
            return Err(CapabilityError::NotOpen);
        }
        let database = self.database.read().await;
        let db = database.as_ref().ok_or(CapabilityError::NotOpen)?;
        let entries = db
            .stores
            .get(store)
            .ok_or_else(|| CapabilityError::UnknownStore(store.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    async fn kv_close(&self) {
        // Data survives a close, like a persistent store would
        self.database_open.store(false, Ordering::SeqCst);
        debug!("kv close");
    }

    async fn clipboard_write(&self, text: String) -> CapabilityResult<()> {
        if self.clipboard_denied.load(Ordering::SeqCst) {
            return Err(CapabilityError::PermissionDenied("clipboard"));
        }
        *self.clipboard.write().await = Some(text);
        Ok(())
    }

    async fn request_notification_permission(&self) -> CapabilityResult<bool> {
        Ok(self.permission.load(Ordering::SeqCst))
    }

    async fn show_notification(&self, title: String, body: String) {
        if !self.permission.load(Ordering::SeqCst) {
            debug!(%title, "notification dropped: no permission");
            return;
        }
        self.notifications
            .write()
            .await
            .push(Notification { title, body });
    }

    async fn push_subscribe(&self, vapid_key: Vec<u8>) -> CapabilityResult<String> {
        if !self.permission.load(Ordering::SeqCst) {
            return Err(CapabilityError::PermissionDenied("push"));
        }
        if vapid_key.is_empty() {
            return Err(CapabilityError::InvalidData("empty application server key".into()));
        }
        let endpoint = self
            .push_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://push.invalid/{}", Uuid::new_v4()));
        let subscription = serde_json::json!({
            "endpoint": endpoint,
            "keys": { "applicationServerKeyLength": vapid_key.len() },
        })
        .to_string();
        *self.subscription.write().await = Some(subscription.clone());
        Ok(subscription)
    }

    async fn push_subscription(&self) -> CapabilityResult<Option<String>> {
        Ok(self.subscription.read().await.clone())
    }

    async fn push_unsubscribe(&self) -> CapabilityResult<bool> {
        Ok(self.subscription.write().await.take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_routes() {
        let platform = HeadlessPlatform::new().with_route(
            "get",
            "https://api.test/data",
            FetchResponse::new(200, &b"{}"[..]),
        );

        let ok = platform
            .fetch(FetchRequest::new("https://api.test/data", "GET"))
            .await
            .unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body, b"{}");

        assert!(platform
            .fetch(FetchRequest::new("https://api.test/missing", "GET"))
            .await
            .is_err());
        assert_eq!(platform.request_count(), 2);
    }

    #[tokio::test]
    async fn test_kv_requires_open_database() {
        let platform = HeadlessPlatform::new();
        assert_eq!(
            platform.kv_put("books", "a", vec![1]).await,
            Err(CapabilityError::NotOpen)
        );

        platform
            .kv_open("library", 2, &["books".to_string()])
            .await
            .unwrap();
        platform.kv_put("books", "a", vec![1, 2]).await.unwrap();
        assert_eq!(platform.kv_get("books", "a").await.unwrap(), Some(vec![1, 2]));
        assert_eq!(platform.kv_get("books", "b").await.unwrap(), None);
        assert!(platform.kv_get("covers", "a").await.is_err());

        platform.kv_delete("books", "a").await.unwrap();
        assert_eq!(platform.kv_get("books", "a").await.unwrap(), None);
        assert_eq!(platform.open_database().await, Some(("library".to_string(), 2)));

        platform.kv_close().await;
        assert_eq!(platform.kv_get("books", "a").await, Err(CapabilityError::NotOpen));
    }

    #[tokio::test]
    async fn test_notifications_need_permission() {
        let denied = HeadlessPlatform::new();
        denied.show_notification("t".into(), "b".into()).await;
        assert!(denied.notifications().await.is_empty());
        assert!(denied.push_subscribe(vec![4; 65]).await.is_err());

        let granted = HeadlessPlatform::new()
            .with_notification_permission(true)
            .with_push_endpoint("https://push.test/abc");
        granted.show_notification("t".into(), "b".into()).await;
        assert_eq!(granted.notifications().await.len(), 1);

        let subscription = granted.push_subscribe(vec![4; 65]).await.unwrap();
        assert!(subscription.contains("https://push.test/abc"));
        assert_eq!(granted.push_subscription().await.unwrap(), Some(subscription));
        assert!(granted.push_unsubscribe().await.unwrap());
        assert!(!granted.push_unsubscribe().await.unwrap());
    }
}
