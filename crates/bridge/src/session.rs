//! Bridge Session - the guest/host lifecycle
//!
//! This is the high-level API an embedder interacts with. It owns the
//! guest and its `HostContext`, and is the only place that calls into the
//! guest:
//!
//! - once per captured host event (`dispatch`)
//! - once per settled capability request (`next_completion`)
//! - for host-initiated deliveries (push, notification clicks)
//!
//! Pending diffs are applied after every one of those calls, before
//! control returns to the caller.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};
use ward_dom::{DomArena, NodeId};

use crate::config::BridgeConfig;
use crate::diff::{apply_pending, DiffStats};
use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, DispatchOutcome, EventBus, EventKind, EventRecord, HostEvent};
use crate::guest::Guest;
use crate::host::HostContext;
use crate::memory::{BufferLayout, MemoryViewMut};
use crate::platform::Platform;
use crate::resolver::Completion;
use crate::resources::ByteResource;

/// Bridge Session - binds one guest to one host tree
pub struct Bridge<G: Guest> {
    pub config: BridgeConfig,
    pub event_bus: EventBus,

    host: HostContext,
    guest: G,
    completions: mpsc::UnboundedReceiver<Completion>,
    started: bool,
    stopped: bool,
}

impl<G: Guest> Bridge<G> {
    /// Bridge over a fresh document whose body is a single
    /// `<div id="app">` mount root
    pub fn new(config: BridgeConfig, guest: G, platform: Arc<dyn Platform>) -> Result<Self> {
        let mut tree = DomArena::new();
        let mount = tree.create_element("div")?;
        tree.set_attribute(mount, "id", "app")?;
        let document = tree.document();
        tree.append_child(document, mount)?;
        Self::with_tree(config, guest, platform, tree, mount)
    }

    /// Bridge over an existing tree. Elements marked `data-wasm` are
    /// adopted into the registry on `start`.
    pub fn with_tree(
        config: BridgeConfig,
        guest: G,
        platform: Arc<dyn Platform>,
        tree: DomArena,
        mount: NodeId,
    ) -> Result<Self> {
        let (host, completions) = HostContext::new(&config, tree, mount, platform)?;
        Ok(Self {
            config,
            event_bus: EventBus::new(),
            host,
            guest,
            completions,
            started: false,
            stopped: false,
        })
    }

    /// Read the guest's buffer layout, seed the registry and run the
    /// guest's `init`. A stopped bridge stays stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped {
            return Err(BridgeError::Stopped);
        }
        if self.started {
            return Ok(());
        }

        let layout = BufferLayout::new(
            [
                self.guest.event_buffer_ptr(),
                self.guest.diff_buffer_ptr(),
                self.guest.fetch_buffer_ptr(),
                self.guest.string_buffer_ptr(),
            ],
            self.config.buffers,
        );
        layout.validate(self.guest.memory().len())?;
        self.host.set_layout(layout);

        let mount = self.host.mount;
        self.host.registry.register_root(mount);
        let adopted = self.host.registry.adopt_marked(&mut self.host.tree)?;
        self.started = true;
        info!(
            instance = %self.config.instance_id,
            adopted,
            "bridge started"
        );

        self.guest.init(&mut self.host);
        self.flush();

        self.event_bus.publish(BridgeEvent::Started {
            instance_id: self.config.instance_id.clone(),
            adopted,
        });
        Ok(())
    }

    /// Stop delivering events for good. In-flight completions are dropped.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        self.stopped = true;
        self.completions.close();
        info!(instance = %self.config.instance_id, "bridge stopped");
        self.event_bus.publish(BridgeEvent::Stopped);
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostContext {
        &mut self.host
    }

    pub fn guest(&self) -> &G {
        &self.guest
    }

    pub fn guest_mut(&mut self) -> &mut G {
        &mut self.guest
    }

    /// Buffer layout read from the guest at `start`
    pub fn layout(&self) -> Result<BufferLayout> {
        self.host.layout().ok_or(BridgeError::NotStarted)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.event_bus.subscribe()
    }

    /// Apply whatever the guest left in its diff buffer
    pub fn flush(&mut self) -> DiffStats {
        let stats = apply_pending(&mut self.host, self.guest.memory_mut());
        if stats.applied + stats.skipped > 0 {
            self.event_bus.publish(BridgeEvent::DiffsApplied {
                applied: stats.applied,
                skipped: stats.skipped,
            });
        }
        stats
    }

    // ---------------------------------------------------------------
    // Host → guest events
    // ---------------------------------------------------------------

    /// Deliver a host input event. Window state is updated either way;
    /// the guest only sees kinds it opted into, and only while running.
    pub fn dispatch(&mut self, event: &HostEvent) -> DispatchOutcome {
        self.host.window.observe(event);
        if !self.started {
            return DispatchOutcome::default();
        }
        let Some(record) = self.host.capture.encode(event, &self.host.registry) else {
            trace!(kind = event.kind().name(), "event not captured");
            return DispatchOutcome::default();
        };

        let listeners = self.host.capture.matching(
            event,
            &self.host.tree,
            &self.host.registry,
            self.host.mount,
        );
        self.host.begin_dispatch(listeners);
        let delivered = self.deliver_record(record);
        let state = self.host.end_dispatch();
        DispatchOutcome {
            delivered,
            default_prevented: delivered && state.default_prevented,
            listeners: state.listeners,
        }
    }

    /// A push message arrived. Delivered as a push event when the guest
    /// listens for pushes, queued as pending otherwise.
    pub fn deliver_push(&mut self, payload: &[u8]) -> bool {
        if !self.started || self.host.push.listeners.is_empty() {
            self.host
                .push
                .pending
                .push(String::from_utf8_lossy(payload).into_owned());
            let pending = self.host.push.pending.len();
            debug!(pending, "push queued");
            self.event_bus.publish(BridgeEvent::PushQueued { pending });
            return false;
        }
        self.deliver_record(EventRecord::with_payload(EventKind::Push, 0, payload.to_vec()))
    }

    /// The user clicked a notification shown by the guest
    pub fn notification_clicked(&mut self, payload: &[u8]) -> bool {
        if !self.started {
            return false;
        }
        self.deliver_record(EventRecord::with_payload(
            EventKind::NotificationClick,
            0,
            payload.to_vec(),
        ))
    }

    /// The push subscription changed outside the guest's control
    pub fn push_subscription_changed(&mut self) {
        if !self.started {
            return;
        }
        self.guest.on_push_subscription_change(&mut self.host);
        self.flush();
    }

    fn deliver_record(&mut self, record: EventRecord) -> bool {
        let Some(layout) = self.host.layout() else {
            return false;
        };
        let mut memory = MemoryViewMut::new(self.guest.memory_mut());
        if let Err(e) = record.write(&mut memory, layout.event) {
            warn!(kind = record.kind.name(), "event record write failed: {}", e);
            return false;
        }

        self.guest.process_event(&mut self.host);
        self.flush();

        self.event_bus.publish(BridgeEvent::EventDelivered {
            kind: record.kind,
            target: record.target,
        });
        true
    }

    // ---------------------------------------------------------------
    // Completions
    // ---------------------------------------------------------------

    /// Wait for the next settled request and hand it to the guest. Returns
    /// false when nothing is in flight.
    pub async fn next_completion(&mut self) -> bool {
        if !self.started || self.host.in_flight() == 0 {
            return false;
        }
        match self.completions.recv().await {
            Some(completion) => {
                self.host.resolver.settled();
                self.deliver(completion);
                true
            }
            None => false,
        }
    }

    /// Deliver a completion only if one is already waiting
    pub fn try_next_completion(&mut self) -> bool {
        if !self.started {
            return false;
        }
        match self.completions.try_recv() {
            Ok(completion) => {
                self.host.resolver.settled();
                self.deliver(completion);
                true
            }
            Err(_) => false,
        }
    }

    /// Deliver completions until nothing is in flight, including requests
    /// issued by the completions themselves. Returns how many ran.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut delivered = 0;
        while self.next_completion().await {
            delivered += 1;
        }
        delivered
    }

    /// Hand one completion to the guest, then apply its diffs
    pub fn deliver(&mut self, completion: Completion) {
        let capability = completion.capability();
        let token = completion.token();
        trace!(capability, token = token.value(), "completion");

        match completion {
            Completion::Fetch {
                token,
                status,
                body,
            } => {
                let (ptr, len) = self.hand_over(&body);
                self.guest
                    .on_fetch_complete(&mut self.host, token, status as u32, ptr, len);
            }
            Completion::Timer { token } => {
                self.guest.on_timer_complete(&mut self.host, token);
            }
            Completion::KvOpen { token, ok } => {
                self.guest
                    .on_kv_open_complete(&mut self.host, token, ok as u32);
            }
            Completion::Kv { token, ok } => {
                self.guest.on_kv_complete(&mut self.host, token, ok as u32);
            }
            Completion::KvGet { token, value } => {
                let (ptr, len) = self.hand_over(value.as_deref().unwrap_or_default());
                self.guest
                    .on_kv_get_complete(&mut self.host, token, ptr, len);
            }
            Completion::Clipboard { token, ok } => {
                self.guest
                    .on_clipboard_complete(&mut self.host, token, ok as u32);
            }
            Completion::FileOpen { token, file } => {
                let (handle, size) = match file {
                    Some(file) => {
                        let size = file.size();
                        (self.host.files.insert(file), size)
                    }
                    None => (0, 0),
                };
                self.guest
                    .on_file_open_complete(&mut self.host, token, handle, size);
            }
            Completion::Decompress { token, data } => {
                let (handle, size) = match data {
                    Some(data) => {
                        let blob = ByteResource::new(data);
                        let size = blob.size();
                        (self.host.blobs.insert(blob), size)
                    }
                    None => (0, 0),
                };
                self.guest
                    .on_decompress_complete(&mut self.host, token, handle, size);
            }
            Completion::Permission { token, granted } => {
                self.guest
                    .on_permission_result(&mut self.host, token, granted as u32);
            }
            Completion::PushSubscribe {
                token,
                subscription,
            } => {
                let (ptr, len) = self.hand_over(subscription.as_deref().unwrap_or("").as_bytes());
                self.guest
                    .on_push_subscribe_complete(&mut self.host, token, ptr, len);
            }
            Completion::PushSubscription {
                token,
                subscription,
            } => {
                let (ptr, len) = self.hand_over(subscription.as_deref().unwrap_or("").as_bytes());
                self.guest
                    .on_push_subscription_result(&mut self.host, token, ptr, len);
            }
            Completion::PushUnsubscribe { token, ok } => {
                self.guest
                    .on_push_unsubscribe_complete(&mut self.host, token, ok as u32);
            }
            Completion::PendingPushes { token, json } => {
                let (ptr, len) = self.hand_over(&json);
                self.guest
                    .on_pending_pushes_result(&mut self.host, token, ptr, len);
            }
            Completion::PendingPushesCleared { token } => {
                self.guest
                    .on_pending_pushes_cleared(&mut self.host, token, 1);
            }
        }

        self.flush();
        self.event_bus.publish(BridgeEvent::CompletionDelivered {
            capability: capability.to_string(),
            token: token.value(),
        });
    }

    /// Copy result bytes into guest memory through the guest allocator.
    /// `(0, 0)` for empty data or when the guest cannot allocate.
    fn hand_over(&mut self, data: &[u8]) -> (u32, u32) {
        if data.is_empty() {
            return (0, 0);
        }
        let Ok(len) = u32::try_from(data.len()) else {
            warn!(len = data.len(), "result too large for guest memory");
            return (0, 0);
        };
        let ptr = self.guest.alloc(len);
        if ptr == 0 {
            warn!(len, "guest allocation failed");
            return (0, 0);
        }
        match MemoryViewMut::new(self.guest.memory_mut()).write_bytes(ptr, data) {
            Ok(()) => (ptr, len),
            Err(e) => {
                warn!("guest allocation out of bounds: {}", e);
                (0, 0)
            }
        }
    }
}
