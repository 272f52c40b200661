//! Host context - everything the guest can reach
//!
//! One `HostContext` per bridge instance. It owns the host tree, the node
//! registry, every handle table and the resolver, and its public methods
//! are the guest's imports. All state is plain fields: the guest is only
//! ever re-entered from one place, so nothing here needs a lock.
//!
//! Imports never fail loudly. Synchronous ones return an empty or zero
//! value; asynchronous ones always settle, with a sentinel if need be.

use std::sync::Arc;

use ahash::AHashSet;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use ward_dom::{measure, parse_fragment, DomArena, Measurement, NodeId, SafeTreeEncoder, Selector};

use crate::capture::EventCapture;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::events::EventKind;
use crate::location::Location;
use crate::memory::BufferLayout;
use crate::platform::{FetchRequest, Platform};
use crate::registry::NodeRegistry;
use crate::resolver::{Completion, Resolver, ResolverToken};
use crate::resources::{decompress, ByteResource, Compression, ObjectUrls, ResourceTable};
use crate::storage::LocalStorage;
use crate::window::WindowState;

/// Push listeners and payloads that arrived while nobody listened
#[derive(Debug, Default)]
pub struct PushState {
    pub(crate) listeners: AHashSet<u32>,
    pub(crate) pending: Vec<String>,
}

/// The host event currently inside `process_event`
#[derive(Debug, Default)]
pub(crate) struct DispatchState {
    pub(crate) listeners: SmallVec<[u32; 4]>,
    pub(crate) default_prevented: bool,
}

pub struct HostContext {
    pub(crate) tree: DomArena,
    pub(crate) mount: NodeId,
    pub(crate) registry: NodeRegistry,
    pub(crate) capture: EventCapture,
    pub(crate) files: ResourceTable,
    pub(crate) blobs: ResourceTable,
    pub(crate) object_urls: ObjectUrls,
    pub(crate) location: Location,
    pub(crate) storage: LocalStorage,
    pub(crate) push: PushState,
    pub(crate) resolver: Resolver,
    pub(crate) window: WindowState,
    dispatch: Option<DispatchState>,
    layout: Option<BufferLayout>,
}

impl HostContext {
    /// Build a context around `tree`, mounted at `mount`. Also returns the
    /// receiving end of the completion queue.
    pub fn new(
        config: &BridgeConfig,
        tree: DomArena,
        mount: NodeId,
        platform: Arc<dyn Platform>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Completion>)> {
        tree.get(mount)?;
        let (resolver, completions) = Resolver::new(platform);
        let host = Self {
            tree,
            mount,
            registry: NodeRegistry::new(),
            capture: EventCapture::new(config.capture.iter().copied()),
            files: ResourceTable::new(),
            blobs: ResourceTable::new(),
            object_urls: ObjectUrls::new(config.object_url_prefix.clone()),
            location: Location::new(&config.page_url)?,
            storage: LocalStorage::new(config.storage_quota),
            push: PushState::default(),
            resolver,
            window: WindowState::default(),
            dispatch: None,
            layout: None,
        };
        Ok((host, completions))
    }

    // ---------------------------------------------------------------
    // Host-side accessors
    // ---------------------------------------------------------------

    pub fn tree(&self) -> &DomArena {
        &self.tree
    }

    /// Direct tree access for the embedder (user input, file selection).
    /// Removing registered nodes here bypasses the registry cascade.
    pub fn tree_mut(&mut self) -> &mut DomArena {
        &mut self.tree
    }

    pub fn mount(&self) -> NodeId {
        self.mount
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Host handle of a registered node
    pub fn node(&self, identifier: u32) -> Option<NodeId> {
        self.registry.get(identifier)
    }

    pub fn capture(&self) -> &EventCapture {
        &self.capture
    }

    pub fn files(&self) -> &ResourceTable {
        &self.files
    }

    pub fn blobs(&self) -> &ResourceTable {
        &self.blobs
    }

    pub fn object_urls(&self) -> &ObjectUrls {
        &self.object_urls
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn pending_push_count(&self) -> usize {
        self.push.pending.len()
    }

    pub fn push_listener_count(&self) -> usize {
        self.push.listeners.len()
    }

    /// Capability requests not yet delivered to the guest
    pub fn in_flight(&self) -> usize {
        self.resolver.in_flight()
    }

    pub fn window(&self) -> &WindowState {
        &self.window
    }

    pub fn layout(&self) -> Option<BufferLayout> {
        self.layout
    }

    pub(crate) fn set_layout(&mut self, layout: BufferLayout) {
        self.layout = Some(layout);
    }

    pub(crate) fn begin_dispatch(&mut self, listeners: SmallVec<[u32; 4]>) {
        self.dispatch = Some(DispatchState {
            listeners,
            default_prevented: false,
        });
    }

    pub(crate) fn end_dispatch(&mut self) -> DispatchState {
        self.dispatch.take().unwrap_or_default()
    }

    // ---------------------------------------------------------------
    // Registry cascade
    // ---------------------------------------------------------------

    /// Drop one entry and the side resources keyed by it
    pub(crate) fn release_entry(&mut self, identifier: u32) {
        if self.registry.delete(identifier).is_some() {
            self.release_side_resources(&[identifier]);
        }
    }

    /// Drop the entries of a node and everything registered below it
    pub(crate) fn release_subtree_entries(&mut self, identifier: u32) -> Vec<u32> {
        let removed = self.registry.delete_subtree(&self.tree, identifier);
        self.release_side_resources(&removed);
        removed
    }

    /// Drop the entries of everything registered below a node
    pub(crate) fn release_descendants(&mut self, identifier: u32) -> Vec<u32> {
        let removed = self.registry.delete_descendants(&self.tree, identifier);
        self.release_side_resources(&removed);
        removed
    }

    fn release_side_resources(&mut self, identifiers: &[u32]) {
        if identifiers.is_empty() {
            return;
        }
        let urls = self.object_urls.release_nodes(identifiers);
        let listeners = self.capture.release_nodes(identifiers);
        if urls > 0 || listeners > 0 {
            debug!(nodes = identifiers.len(), urls, listeners, "released node resources");
        }
    }

    // ---------------------------------------------------------------
    // Imports: logging
    // ---------------------------------------------------------------

    /// Guest log line. Levels: 0 debug, 1 info, 2 warn, 3 error.
    pub fn log(&self, level: u32, message: &str) {
        match level {
            0 => debug!(target: "guest", "{}", message),
            2 => warn!(target: "guest", "{}", message),
            3 => error!(target: "guest", "{}", message),
            _ => info!(target: "guest", "{}", message),
        }
    }

    // ---------------------------------------------------------------
    // Imports: network
    // ---------------------------------------------------------------

    /// Completes with `on_fetch_complete(token, status, body)`; status 0 on
    /// network failure.
    pub fn fetch(&mut self, url: &str, method: &str, token: ResolverToken) {
        let request = FetchRequest::new(self.resolve_url(url), method);
        self.issue_fetch(request, token);
    }

    /// Like `fetch`, with a JSON request body
    pub fn fetch_json(&mut self, url: &str, method: &str, body: &str, token: ResolverToken) {
        let request = FetchRequest::json(self.resolve_url(url), method, body.as_bytes());
        self.issue_fetch(request, token);
    }

    fn resolve_url(&self, url: &str) -> String {
        self.location
            .url()
            .join(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string())
    }

    fn issue_fetch(&mut self, request: FetchRequest, token: ResolverToken) {
        let platform = self.resolver.platform();
        let failed = Completion::Fetch {
            token,
            status: 0,
            body: Vec::new(),
        };
        self.resolver.spawn(failed, async move {
            match platform.fetch(request).await {
                Ok(response) => Completion::Fetch {
                    token,
                    status: response.status,
                    body: response.body,
                },
                Err(e) => {
                    warn!("fetch failed: {}", e);
                    Completion::Fetch {
                        token,
                        status: 0,
                        body: Vec::new(),
                    }
                }
            }
        });
    }

    // ---------------------------------------------------------------
    // Imports: local storage
    // ---------------------------------------------------------------

    pub fn storage_get(&self, key: &str) -> Option<&str> {
        self.storage.get(key)
    }

    pub fn storage_set(&mut self, key: &str, value: &str) -> bool {
        self.storage.set(key, value)
    }

    pub fn storage_remove(&mut self, key: &str) {
        self.storage.remove(key);
    }

    pub fn storage_clear(&mut self) {
        self.storage.clear();
    }

    // ---------------------------------------------------------------
    // Imports: key-value database
    // ---------------------------------------------------------------

    pub fn kv_open(&mut self, db: &str, version: u32, stores: &[&str], token: ResolverToken) {
        let platform = self.resolver.platform();
        let db = db.to_string();
        let stores: Vec<String> = stores.iter().map(|s| s.to_string()).collect();
        self.resolver
            .spawn(Completion::KvOpen { token, ok: false }, async move {
                let ok = platform.kv_open(&db, version, &stores).await;
                Completion::KvOpen {
                    token,
                    ok: settled_ok("kv_open", ok),
                }
            });
    }

    pub fn kv_put(&mut self, store: &str, key: &str, value: &[u8], token: ResolverToken) {
        self.issue_kv_put(store, key, value.to_vec(), token);
    }

    /// Store the bytes behind a blob handle. Unknown handles fail.
    pub fn kv_put_blob(&mut self, store: &str, key: &str, blob: u32, token: ResolverToken) {
        match self.blobs.get(blob) {
            Some(resource) => {
                let value = resource.data.to_vec();
                self.issue_kv_put(store, key, value, token);
            }
            None => {
                debug!(blob, "kv_put_blob: unknown blob handle");
                self.resolver.resolve(Completion::Kv { token, ok: false });
            }
        }
    }

    fn issue_kv_put(&mut self, store: &str, key: &str, value: Vec<u8>, token: ResolverToken) {
        let platform = self.resolver.platform();
        let (store, key) = (store.to_string(), key.to_string());
        self.resolver
            .spawn(Completion::Kv { token, ok: false }, async move {
                let ok = platform.kv_put(&store, &key, value).await;
                Completion::Kv {
                    token,
                    ok: settled_ok("kv_put", ok),
                }
            });
    }

    /// Completes with the value, or an empty result when absent
    pub fn kv_get(&mut self, store: &str, key: &str, token: ResolverToken) {
        let platform = self.resolver.platform();
        let (store, key) = (store.to_string(), key.to_string());
        self.resolver
            .spawn(Completion::KvGet { token, value: None }, async move {
                let value = match platform.kv_get(&store, &key).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("kv_get failed: {}", e);
                        None
                    }
                };
                Completion::KvGet { token, value }
            });
    }

    pub fn kv_delete(&mut self, store: &str, key: &str, token: ResolverToken) {
        let platform = self.resolver.platform();
        let (store, key) = (store.to_string(), key.to_string());
        self.resolver
            .spawn(Completion::Kv { token, ok: false }, async move {
                let ok = platform.kv_delete(&store, &key).await;
                Completion::Kv {
                    token,
                    ok: settled_ok("kv_delete", ok),
                }
            });
    }

    pub fn kv_close(&mut self) {
        let platform = self.resolver.platform();
        self.resolver.detach(async move { platform.kv_close().await });
    }

    // ---------------------------------------------------------------
    // Imports: timers and clipboard
    // ---------------------------------------------------------------

    pub fn set_timer(&mut self, delay_ms: u32, token: ResolverToken) {
        self.resolver.spawn(Completion::Timer { token }, async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms as u64)).await;
            Completion::Timer { token }
        });
    }

    pub fn clipboard_write(&mut self, text: &str, token: ResolverToken) {
        let platform = self.resolver.platform();
        let text = text.to_string();
        self.resolver
            .spawn(Completion::Clipboard { token, ok: false }, async move {
                let ok = platform.clipboard_write(text).await;
                Completion::Clipboard {
                    token,
                    ok: settled_ok("clipboard_write", ok),
                }
            });
    }

    // ---------------------------------------------------------------
    // Imports: files
    // ---------------------------------------------------------------

    /// Open the first file selected in a file input. Completes with handle
    /// 0 when the node is unknown or nothing is selected.
    pub fn file_open(&mut self, identifier: u32, token: ResolverToken) {
        let file = self
            .registry
            .get(identifier)
            .and_then(|node| self.tree.get(node).ok())
            .and_then(|node| node.files.first())
            .map(|file| ByteResource::named(file.name.clone(), file.data.clone()));
        if file.is_none() {
            debug!(identifier, "file_open: no selected file");
        }
        self.resolver.resolve(Completion::FileOpen { token, file });
    }

    pub fn file_size(&self, handle: u32) -> u32 {
        self.files.size_of(handle)
    }

    pub fn file_name(&self, handle: u32) -> Option<&str> {
        self.files.get(handle).and_then(|file| file.name.as_deref())
    }

    /// Up to `len` bytes at `offset`; empty for an unknown handle
    pub fn file_read(&self, handle: u32, offset: u32, len: u32) -> &[u8] {
        self.files.read(handle, offset, len)
    }

    pub fn file_close(&mut self, handle: u32) {
        self.files.remove(handle);
    }

    // ---------------------------------------------------------------
    // Imports: decompression and blobs
    // ---------------------------------------------------------------

    /// Inflate `data` (0 gzip, 1 deflate, 2 deflate-raw) into a new blob.
    /// Completes with handle 0 on failure.
    pub fn decompress(&mut self, data: &[u8], method: u32, token: ResolverToken) {
        let failed = Completion::Decompress { token, data: None };
        let Some(method) = Compression::from_code(method) else {
            debug!(method, "decompress: unknown method");
            return self.resolver.resolve(failed);
        };
        let data = data.to_vec();
        self.resolver.spawn_blocking(failed, move || {
            let data = match decompress(&data, method) {
                Ok(output) => Some(output),
                Err(e) => {
                    warn!("decompress failed: {}", e);
                    None
                }
            };
            Completion::Decompress { token, data }
        });
    }

    pub fn blob_size(&self, handle: u32) -> u32 {
        self.blobs.size_of(handle)
    }

    pub fn blob_read(&self, handle: u32, offset: u32, len: u32) -> &[u8] {
        self.blobs.read(handle, offset, len)
    }

    pub fn blob_free(&mut self, handle: u32) {
        self.blobs.remove(handle);
    }

    /// Replace a node's content with the markup in a blob. Returns 1 on
    /// success, 0 when the node or blob is unknown.
    pub fn set_inner_html_from_blob(&mut self, identifier: u32, blob: u32) -> u32 {
        let (Some(node), Some(resource)) = (self.registry.get(identifier), self.blobs.get(blob)) else {
            return 0;
        };
        let html = String::from_utf8_lossy(&resource.data).into_owned();
        self.release_descendants(identifier);
        let replaced = self
            .tree
            .remove_children(node)
            .and_then(|_| parse_fragment(&mut self.tree, node, &html));
        match replaced {
            Ok(_) => 1,
            Err(e) => {
                debug!(identifier, "set_inner_html_from_blob: {}", e);
                0
            }
        }
    }

    /// Point an image's `src` at a fresh object URL for the blob. The URL
    /// the node held before is revoked. Returns 1 on success, 0 otherwise.
    pub fn set_image_src_from_blob(&mut self, identifier: u32, blob: u32, mime: &str) -> u32 {
        let (Some(node), Some(resource)) = (self.registry.get(identifier), self.blobs.get(blob)) else {
            return 0;
        };
        let url = self
            .object_urls
            .create(identifier, mime, resource.data.clone());
        if let Err(e) = self.tree.set_attribute(node, "src", &url) {
            debug!(identifier, "set_image_src_from_blob: {}", e);
            self.object_urls.revoke(identifier);
            return 0;
        }
        1
    }

    // ---------------------------------------------------------------
    // Imports: HTML parsing
    // ---------------------------------------------------------------

    /// Parse untrusted markup into the safe-tree stream. Parsing happens
    /// in a scratch tree that is never attached to the document.
    pub fn parse_html(&self, html: &str) -> Vec<u8> {
        let mut scratch = DomArena::with_capacity(64);
        let Ok(holder) = scratch.create_element("template") else {
            return Vec::new();
        };
        if let Err(e) = parse_fragment(&mut scratch, holder, html) {
            debug!("parse_html: {}", e);
            return Vec::new();
        }
        SafeTreeEncoder::new()
            .encode_children(&scratch, holder)
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------
    // Imports: DOM reads
    // ---------------------------------------------------------------

    /// Headless box of a registered element. `None` for unknown
    /// identifiers and non-element nodes.
    pub fn measure_node(&self, identifier: u32) -> Option<Measurement> {
        let node = self.registry.get(identifier)?;
        match measure(&self.tree, node, self.window.viewport) {
            Ok(measurement) => Some(measurement),
            Err(e) => {
                debug!(identifier, "measure_node: {}", e);
                None
            }
        }
    }

    /// First element under the mount (mount included) matching
    /// `selector`, registered so the guest can address it. `None` for no
    /// match or an unsupported selector.
    pub fn query_selector(&mut self, selector: &str) -> Option<u32> {
        let selector = match Selector::parse(selector) {
            Ok(selector) => selector,
            Err(e) => {
                debug!("query_selector: {}", e);
                return None;
            }
        };
        let node = selector.first_match(&self.tree, self.mount)?;
        match self.registry.register(&mut self.tree, node) {
            Ok(identifier) => Some(identifier),
            Err(e) => {
                warn!("query_selector: register failed: {}", e);
                None
            }
        }
    }

    // ---------------------------------------------------------------
    // Imports: window
    // ---------------------------------------------------------------

    pub fn focus_window(&mut self) {
        self.window.focus();
    }

    /// 0 visible, 1 hidden
    pub fn get_visibility_state(&self) -> u32 {
        self.window.visibility_code()
    }

    // ---------------------------------------------------------------
    // Imports: notifications and push
    // ---------------------------------------------------------------

    pub fn notification_request_permission(&mut self, token: ResolverToken) {
        let platform = self.resolver.platform();
        self.resolver.spawn(
            Completion::Permission {
                token,
                granted: false,
            },
            async move {
                let granted = match platform.request_notification_permission().await {
                    Ok(granted) => granted,
                    Err(e) => {
                        warn!("notification permission request failed: {}", e);
                        false
                    }
                };
                Completion::Permission { token, granted }
            },
        );
    }

    /// Silently dropped without permission
    pub fn notification_show(&mut self, title: &str, body: &str) {
        let platform = self.resolver.platform();
        let (title, body) = (title.to_string(), body.to_string());
        self.resolver
            .detach(async move { platform.show_notification(title, body).await });
    }

    pub fn push_subscribe(&mut self, vapid_key: &[u8], token: ResolverToken) {
        let platform = self.resolver.platform();
        let key = vapid_key.to_vec();
        self.resolver.spawn(
            Completion::PushSubscribe {
                token,
                subscription: None,
            },
            async move {
                let subscription = match platform.push_subscribe(key).await {
                    Ok(subscription) => Some(subscription),
                    Err(e) => {
                        warn!("push subscribe failed: {}", e);
                        None
                    }
                };
                Completion::PushSubscribe {
                    token,
                    subscription,
                }
            },
        );
    }

    pub fn push_get_subscription(&mut self, token: ResolverToken) {
        let platform = self.resolver.platform();
        self.resolver.spawn(
            Completion::PushSubscription {
                token,
                subscription: None,
            },
            async move {
                let subscription = platform.push_subscription().await.ok().flatten();
                Completion::PushSubscription {
                    token,
                    subscription,
                }
            },
        );
    }

    pub fn push_unsubscribe(&mut self, token: ResolverToken) {
        let platform = self.resolver.platform();
        self.resolver
            .spawn(Completion::PushUnsubscribe { token, ok: false }, async move {
                let ok = platform.push_unsubscribe().await.unwrap_or(false);
                Completion::PushUnsubscribe { token, ok }
            });
    }

    pub fn add_push_listener(&mut self, listener_id: u32) {
        self.push.listeners.insert(listener_id);
    }

    pub fn remove_push_listener(&mut self, listener_id: u32) {
        self.push.listeners.remove(&listener_id);
    }

    /// Completes with the queued push payloads as a JSON array of strings
    pub fn pending_pushes(&mut self, token: ResolverToken) {
        let json = match serde_json::to_vec(&self.push.pending) {
            Ok(json) => json,
            Err(e) => {
                warn!("pending pushes encode failed: {}", e);
                Vec::new()
            }
        };
        self.resolver
            .resolve(Completion::PendingPushes { token, json });
    }

    pub fn clear_pending_pushes(&mut self, token: ResolverToken) {
        self.push.pending.clear();
        self.resolver
            .resolve(Completion::PendingPushesCleared { token });
    }

    // ---------------------------------------------------------------
    // Imports: location
    // ---------------------------------------------------------------

    pub fn url_origin(&self) -> String {
        self.location.origin()
    }

    pub fn url_href(&self) -> &str {
        self.location.href()
    }

    /// Fragment without `#`; empty when there is none
    pub fn url_hash(&self) -> &str {
        self.location.hash()
    }

    pub fn set_url_hash(&mut self, hash: &str) {
        self.location.set_hash(hash);
    }

    pub fn clear_url_hash(&mut self) {
        self.location.clear_hash();
    }

    pub fn push_state(&mut self, url: &str) -> bool {
        self.location.push_state(url).unwrap_or_else(|e| {
            debug!(url, "push_state: {}", e);
            false
        })
    }

    pub fn replace_state(&mut self, url: &str) -> bool {
        self.location.replace_state(url).unwrap_or_else(|e| {
            debug!(url, "replace_state: {}", e);
            false
        })
    }

    // ---------------------------------------------------------------
    // Imports: event listeners
    // ---------------------------------------------------------------

    /// Opt into `event_type` events through a listener bound to a node.
    /// Unknown nodes and event types are ignored.
    pub fn add_event_listener(&mut self, identifier: u32, event_type: &str, listener_id: u32) {
        if !self.registry.contains(identifier) {
            debug!(identifier, "add_event_listener: node not registered");
            return;
        }
        let Some(kind) = EventKind::from_name(event_type) else {
            debug!(event_type, "add_event_listener: unsupported event type");
            return;
        };
        self.capture.add_listener(listener_id, identifier, kind);
    }

    pub fn remove_event_listener(&mut self, listener_id: u32) {
        self.capture.remove_listener(listener_id);
    }

    /// Listeners reached by the event being processed, innermost first.
    /// Empty outside `process_event`.
    pub fn event_listeners(&self) -> &[u32] {
        self.dispatch
            .as_ref()
            .map(|dispatch| dispatch.listeners.as_slice())
            .unwrap_or_default()
    }

    /// Cancel the host's default action for the event being processed.
    /// No-op outside `process_event`.
    pub fn prevent_default(&mut self) {
        match self.dispatch.as_mut() {
            Some(dispatch) => dispatch.default_prevented = true,
            None => debug!("prevent_default outside event dispatch"),
        }
    }
}

fn settled_ok(capability: &str, outcome: crate::error::CapabilityResult<()>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e) => {
            warn!(capability, "request failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HeadlessPlatform;
    use ward_dom::serializer::{SAFE_ELEMENT_CLOSE, SAFE_ELEMENT_OPEN, SAFE_TEXT};

    fn context() -> HostContext {
        let mut tree = DomArena::new();
        let mount = tree.create_element("main").unwrap();
        tree.append_child(tree.document(), mount).unwrap();
        let config = BridgeConfig {
            page_url: "https://reader.test/app#intro".to_string(),
            ..Default::default()
        };
        let (mut host, _completions) =
            HostContext::new(&config, tree, mount, HeadlessPlatform::new().into_shared()).unwrap();
        host.registry.register_root(mount);
        host
    }

    #[test]
    fn test_parse_html_emits_filtered_stream() {
        let host = context();
        let stream = host.parse_html("<p>ok</p><script>bad()</script>");
        assert_eq!(
            stream,
            vec![SAFE_ELEMENT_OPEN, 1, b'p', 0, SAFE_TEXT, 2, 0, b'o', b'k', SAFE_ELEMENT_CLOSE]
        );
        // Scratch parsing never touches the live tree
        assert_eq!(host.tree().len(), 2);
    }

    #[test]
    fn test_parse_html_survives_deep_nesting() {
        let host = context();
        let depth = 200_000;
        let stream = host.parse_html(&"<b>".repeat(depth));
        assert_eq!(stream.len(), depth * 5);
        assert_eq!(stream.last(), Some(&SAFE_ELEMENT_CLOSE));
    }

    #[test]
    fn test_blob_backed_markup_and_images() {
        let mut host = context();
        let mount = host.mount();
        let image = host.tree.create_element("img").unwrap();
        host.tree.append_child(mount, image).unwrap();
        host.registry.insert(3, image);
        let markup = host.blobs.insert(ByteResource::new(b"<em>hi</em>".to_vec()));
        let picture = host.blobs.insert(ByteResource::new(vec![0x89, b'P', b'N', b'G']));

        assert_eq!(host.set_image_src_from_blob(3, picture, "image/png"), 1);
        let src = host.tree.get(image).unwrap().attr("src").unwrap().to_string();
        assert!(src.starts_with("blob:ward/"));
        assert_eq!(host.object_urls().resolve(&src).unwrap().mime, "image/png");

        assert_eq!(host.set_inner_html_from_blob(0, markup), 1);
        assert_eq!(host.tree.text_content(mount).unwrap(), "hi");
        // The image was below the root: entry and URL are gone
        assert!(!host.registry.contains(3));
        assert!(host.object_urls().is_empty());

        assert_eq!(host.set_inner_html_from_blob(0, 99), 0);
        assert_eq!(host.set_image_src_from_blob(42, picture, "image/png"), 0);
    }

    #[test]
    fn test_event_listener_lifecycle() {
        let mut host = context();
        host.add_event_listener(0, "scroll", 1);
        host.add_event_listener(77, "scroll", 2);
        host.add_event_listener(0, "wheel", 3);
        assert_eq!(host.capture().listener_count(), 1);
        assert!(host.capture().wants(EventKind::Scroll));

        host.remove_event_listener(1);
        assert!(!host.capture().wants(EventKind::Scroll));
    }

    #[test]
    fn test_dom_read_imports() {
        let mut host = context();
        let mount = host.mount();
        parse_fragment(
            &mut host.tree,
            mount,
            "<h2>Shelf</h2><ul class=\"books\"><li id=\"first\">Dune</li></ul>",
        )
        .unwrap();

        let first = host.query_selector("ul.books #first").unwrap();
        assert_eq!(host.node(first), host.tree.find_by_id("first"));
        // A second query finds the same entry
        assert_eq!(host.query_selector("#first"), Some(first));
        assert_eq!(host.query_selector("main"), Some(0));
        assert_eq!(host.query_selector("video"), None);
        assert_eq!(host.query_selector("li:first-child"), None);

        let item = host.measure_node(first).unwrap();
        assert_eq!(item.bounds.y, 16.0);
        assert_eq!(item.bounds.height, 16.0);
        assert_eq!(item.bounds.width, host.window().viewport.width);
        assert!(host.measure_node(999).is_none());
    }

    #[test]
    fn test_window_imports() {
        let mut host = context();
        assert_eq!(host.get_visibility_state(), crate::window::VISIBLE);
        host.window.observe(&crate::events::HostEvent::VisibilityChange { hidden: true });
        assert_eq!(host.get_visibility_state(), crate::window::HIDDEN);
        host.focus_window();
        assert!(!host.window().focused);
    }

    #[test]
    fn test_prevent_default_needs_a_dispatch() {
        let mut host = context();
        host.prevent_default();
        assert!(host.event_listeners().is_empty());
        assert!(!host.end_dispatch().default_prevented);

        host.begin_dispatch(SmallVec::from_slice(&[4, 2]));
        assert_eq!(host.event_listeners(), &[4, 2]);
        host.prevent_default();
        let state = host.end_dispatch();
        assert!(state.default_prevented);
        assert!(host.event_listeners().is_empty());
    }

    #[test]
    fn test_location_imports() {
        let mut host = context();
        assert_eq!(host.url_origin(), "https://reader.test");
        assert_eq!(host.url_hash(), "intro");

        host.set_url_hash("chapter-2");
        assert_eq!(host.url_hash(), "chapter-2");
        host.clear_url_hash();
        assert_eq!(host.url_hash(), "");

        assert!(host.push_state("/library"));
        assert!(!host.replace_state("https://other.test/"));
        assert_eq!(host.url_href(), "https://reader.test/library");
    }

    #[test]
    fn test_storage_imports() {
        let mut host = context();
        assert!(host.storage_set("theme", "dark"));
        assert_eq!(host.storage_get("theme"), Some("dark"));
        host.storage_remove("theme");
        assert_eq!(host.storage_get("theme"), None);
    }
}
