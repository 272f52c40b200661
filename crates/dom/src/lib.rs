//! Host document tree for the guest bridge
//!
//! A small, mutable DOM: the structure the bridge renders guest diffs into.
//!
//! ## Core Design
//!
//! ```text
//! diff record → DomArena mutation (NodeId = index + generation)
//!                    ↓
//!        html::parse_fragment / serializer
//! ```
//!
//! - **Data structures first**: one arena, indices instead of pointers
//! - **No dangling handles**: freed slots bump their generation
//! - **No panics on bad input**: markup that fails to parse degrades to text

pub mod arena;
pub mod error;
pub mod html;
pub mod layout;
pub mod selector;
pub mod serializer;
pub mod types;

pub use arena::DomArena;
pub use error::{DomError, Result};
pub use html::parse_fragment;
pub use layout::{measure, Measurement, Viewport};
pub use selector::Selector;
pub use serializer::{inner_html, outer_html, SafeTreeEncoder};
pub use types::*;
