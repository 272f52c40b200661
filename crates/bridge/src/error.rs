//! Error types for the bridge
//!
//! None of these cross the guest boundary: every caller turns them into a
//! no-op or a sentinel before the guest sees anything.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Memory access out of bounds: {len} bytes at {ptr} (memory size {size})")]
    OutOfBounds { ptr: u32, len: u32, size: usize },

    #[error("Guest buffer {name} at {ptr} (+{capacity}) does not fit in {size} bytes of memory")]
    BadBuffer {
        name: &'static str,
        ptr: u32,
        capacity: u32,
        size: usize,
    },

    #[error("Host tree error: {0}")]
    Dom(#[from] ward_dom::DomError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Bridge not started")]
    NotStarted,

    #[error("Bridge was stopped and cannot be restarted")]
    Stopped,
}

/// Failure of a host capability. Always surfaces to the guest as the
/// completion's sentinel value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("Database not open")]
    NotOpen,

    #[error("Unknown object store: {0}")]
    UnknownStore(String),

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;
