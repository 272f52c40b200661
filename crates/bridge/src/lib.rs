//! Guest Bridge - Rust Implementation
//!
//! Connects a sandboxed guest program (a WASM module, or anything that
//! exposes linear memory and a few entry points) to a host document tree.
//!
//! # Architecture
//!
//! 1. **Shared buffers, not calls**: events go in through the event buffer,
//!    DOM changes come out through the diff buffer, one batch per guest call
//! 2. **Identifiers, not pointers**: the guest names nodes by `u32`; the
//!    registry maps them to arena handles and is kept in step with removals
//! 3. **Every request settles**: capability imports complete through the
//!    resolver with a real result or a sentinel, never silence

pub mod capture;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod guest;
pub mod host;
pub mod location;
pub mod memory;
#[cfg(feature = "network")]
pub mod network;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod resources;
pub mod session;
pub mod storage;
pub mod window;

pub use config::BridgeConfig;
pub use diff::{DiffOp, DiffRecord, DiffStats};
pub use error::{BridgeError, CapabilityError, Result};
pub use events::{
    BridgeEvent, DispatchOutcome, EventBus, EventKind, EventRecord, HostEvent, Modifiers,
};
pub use guest::Guest;
pub use host::HostContext;
pub use memory::{BufferCapacities, BufferLayout, Region};
#[cfg(feature = "network")]
pub use network::NetworkPlatform;
pub use platform::{HeadlessPlatform, Platform};
pub use registry::{NodeRegistry, ROOT_IDENTIFIER};
pub use resolver::{Completion, ResolverToken};
pub use session::Bridge;
pub use window::WindowState;
