//! Events - both directions
//!
//! - `HostEvent` / `EventRecord`: host input events and their binary form
//!   in the guest's event buffer.
//! - `BridgeEvent` / `EventBus`: lifecycle notifications for host-side
//!   observers. Use enums, not trait objects.
//!
//! ## Event record layout
//!
//! ```text
//! 0      kind        u8
//! 1..5   target      u32le   identifier, 0 when unresolved
//! 5..9   data1       u32le
//! 9..13  data2       u32le
//! 13..   payload     bytes   length in data1
//! ```

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::broadcast;
use ward_dom::NodeId;

use crate::error::Result;
use crate::memory::{MemoryViewMut, Region};

pub const EVENT_HEADER_SIZE: u32 = 13;

/// Event kinds, by wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum EventKind {
    Click = 1,
    Input = 2,
    Submit = 3,
    KeyDown = 4,
    KeyUp = 5,
    Focus = 6,
    Blur = 7,
    Push = 8,
    NotificationClick = 9,
    Scroll = 10,
    Resize = 11,
    Touch = 12,
    VisibilityChange = 13,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::Click,
        EventKind::Input,
        EventKind::Submit,
        EventKind::KeyDown,
        EventKind::KeyUp,
        EventKind::Focus,
        EventKind::Blur,
        EventKind::Push,
        EventKind::NotificationClick,
        EventKind::Scroll,
        EventKind::Resize,
        EventKind::Touch,
        EventKind::VisibilityChange,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    /// Host event type name
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::Input => "input",
            EventKind::Submit => "submit",
            EventKind::KeyDown => "keydown",
            EventKind::KeyUp => "keyup",
            EventKind::Focus => "focus",
            EventKind::Blur => "blur",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
            EventKind::Scroll => "scroll",
            EventKind::Resize => "resize",
            EventKind::Touch => "touchstart",
            EventKind::VisibilityChange => "visibilitychange",
        }
    }

    /// Kinds fired at the window rather than at an element
    pub fn is_window_level(self) -> bool {
        matches!(self, EventKind::Resize | EventKind::VisibilityChange)
    }

    /// Accepts host event type names, including the touch family
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "touchstart" | "touchend" | "touchmove" | "touch" => Some(EventKind::Touch),
            other => Self::ALL.iter().copied().find(|kind| kind.name() == other),
        }
    }
}

/// Keyboard modifier state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    /// bit0 shift, bit1 ctrl, bit2 alt, bit3 meta
    pub fn bits(self) -> u32 {
        (self.shift as u32)
            | (self.ctrl as u32) << 1
            | (self.alt as u32) << 2
            | (self.meta as u32) << 3
    }
}

/// A captured host input event. `target` is the event target element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Click { target: Option<NodeId>, x: i32, y: i32 },
    Input { target: Option<NodeId>, value: String },
    Submit { target: Option<NodeId> },
    KeyDown { target: Option<NodeId>, key_code: u32, modifiers: Modifiers },
    KeyUp { target: Option<NodeId>, key_code: u32, modifiers: Modifiers },
    Focus { target: Option<NodeId> },
    Blur { target: Option<NodeId> },
    Scroll { target: Option<NodeId>, left: i32, top: i32 },
    Resize { width: i32, height: i32 },
    Touch { target: Option<NodeId>, x: i32, y: i32 },
    VisibilityChange { hidden: bool },
}

impl HostEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::Click { .. } => EventKind::Click,
            HostEvent::Input { .. } => EventKind::Input,
            HostEvent::Submit { .. } => EventKind::Submit,
            HostEvent::KeyDown { .. } => EventKind::KeyDown,
            HostEvent::KeyUp { .. } => EventKind::KeyUp,
            HostEvent::Focus { .. } => EventKind::Focus,
            HostEvent::Blur { .. } => EventKind::Blur,
            HostEvent::Scroll { .. } => EventKind::Scroll,
            HostEvent::Resize { .. } => EventKind::Resize,
            HostEvent::Touch { .. } => EventKind::Touch,
            HostEvent::VisibilityChange { .. } => EventKind::VisibilityChange,
        }
    }

    pub fn target(&self) -> Option<NodeId> {
        match self {
            HostEvent::Click { target, .. }
            | HostEvent::Input { target, .. }
            | HostEvent::Submit { target }
            | HostEvent::KeyDown { target, .. }
            | HostEvent::KeyUp { target, .. }
            | HostEvent::Focus { target }
            | HostEvent::Blur { target }
            | HostEvent::Scroll { target, .. }
            | HostEvent::Touch { target, .. } => *target,
            HostEvent::Resize { .. } | HostEvent::VisibilityChange { .. } => None,
        }
    }

    /// Encode with an already-resolved target identifier
    pub fn to_record(&self, target: u32) -> EventRecord {
        let kind = self.kind();
        match self {
            HostEvent::Click { x, y, .. } | HostEvent::Touch { x, y, .. } => {
                EventRecord::new(kind, target, *x as u32, *y as u32)
            }
            HostEvent::Scroll { left, top, .. } => {
                EventRecord::new(kind, target, *left as u32, *top as u32)
            }
            HostEvent::Resize { width, height } => {
                EventRecord::new(kind, target, *width as u32, *height as u32)
            }
            HostEvent::KeyDown {
                key_code,
                modifiers,
                ..
            }
            | HostEvent::KeyUp {
                key_code,
                modifiers,
                ..
            } => EventRecord::new(kind, target, *key_code, modifiers.bits()),
            HostEvent::Input { value, .. } => {
                EventRecord::with_payload(kind, target, value.as_bytes().to_vec())
            }
            HostEvent::VisibilityChange { hidden } => {
                EventRecord::new(kind, target, *hidden as u32, 0)
            }
            HostEvent::Submit { .. } | HostEvent::Focus { .. } | HostEvent::Blur { .. } => {
                EventRecord::new(kind, target, 0, 0)
            }
        }
    }
}

/// What became of one dispatched host event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The guest's `process_event` ran
    pub delivered: bool,
    /// The guest called `prevent_default` while handling it
    pub default_prevented: bool,
    /// Listeners the event reached, innermost first
    pub listeners: SmallVec<[u32; 4]>,
}

/// Wire form of one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub target: u32,
    pub data1: u32,
    pub data2: u32,
    pub payload: Vec<u8>,
}

impl EventRecord {
    pub fn new(kind: EventKind, target: u32, data1: u32, data2: u32) -> Self {
        Self {
            kind,
            target,
            data1,
            data2,
            payload: Vec::new(),
        }
    }

    /// Record carrying raw bytes; `data1` is the payload length
    pub fn with_payload(kind: EventKind, target: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            target,
            data1: payload.len() as u32,
            data2: 0,
            payload,
        }
    }

    /// Write into the event buffer. A payload longer than the buffer is
    /// truncated; for text payloads the cut lands on a UTF-8 boundary.
    /// Returns the number of bytes written.
    pub fn write(&self, memory: &mut MemoryViewMut<'_>, region: Region) -> Result<u32> {
        let room = region.capacity.saturating_sub(EVENT_HEADER_SIZE) as usize;
        let payload = if self.payload.len() > room {
            truncate_utf8(&self.payload, room)
        } else {
            &self.payload[..]
        };
        let data1 = if self.payload.is_empty() {
            self.data1
        } else {
            payload.len() as u32
        };

        let mut header = [0u8; EVENT_HEADER_SIZE as usize];
        header[0] = self.kind.code();
        header[1..5].copy_from_slice(&self.target.to_le_bytes());
        header[5..9].copy_from_slice(&data1.to_le_bytes());
        header[9..13].copy_from_slice(&self.data2.to_le_bytes());

        memory.write_region(region, 0, &header)?;
        memory.write_region(region, EVENT_HEADER_SIZE, payload)?;
        Ok(EVENT_HEADER_SIZE + payload.len() as u32)
    }
}

/// Longest prefix of at most `max` bytes that does not split a UTF-8
/// sequence. Non-UTF-8 data is cut at `max`.
fn truncate_utf8(bytes: &[u8], max: usize) -> &[u8] {
    let cut = &bytes[..max];
    match std::str::from_utf8(cut) {
        Ok(_) => cut,
        Err(e) if e.error_len().is_none() => &cut[..e.valid_up_to()],
        Err(_) => cut,
    }
}

/// Lifecycle notifications published by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    Started { instance_id: String, adopted: usize },
    EventDelivered { kind: EventKind, target: u32 },
    DiffsApplied { applied: usize, skipped: usize },
    CompletionDelivered { capability: String, token: u32 },
    PushQueued { pending: usize },
    Stopped,
}

/// Simple event bus using tokio broadcast channel
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: BridgeEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
