//! Diff Application Engine
//!
//! The guest batches DOM changes into its diff buffer and the bridge
//! applies them in order after every guest call.
//!
//! ## Diff buffer layout
//!
//! ```text
//! 0        count    u8        live records, reset to 0 after applying
//! 4 + 16i  opcode   u32le
//! 8 + 16i  target   u32le     node identifier
//! 12 + 16i value1   u32le
//! 16 + 16i value2   u32le
//! ```
//!
//! A record that names a missing node, carries an unknown opcode or points
//! outside its buffer is skipped; the rest of the batch still applies.

use smallvec::SmallVec;
use tracing::{debug, trace};
use ward_dom::{parse_fragment, Translate, NODE_ID_ATTR, WASM_MARKER_ATTR};

use crate::host::HostContext;
use crate::memory::{MemoryView, MemoryViewMut, Region};
use crate::registry::ROOT_IDENTIFIER;

pub const DIFF_HEADER_SIZE: u32 = 4;
pub const DIFF_RECORD_SIZE: u32 = 16;

pub const OP_SET_TEXT: u32 = 1;
pub const OP_SET_ATTR: u32 = 2;
pub const OP_SET_TRANSFORM: u32 = 3;
pub const OP_CREATE_ELEMENT: u32 = 4;
pub const OP_REMOVE_CHILD: u32 = 5;
pub const OP_SET_INNER_HTML: u32 = 6;
pub const OP_REMOVE_CHILDREN: u32 = 7;

/// One raw 16-byte record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffRecord {
    pub opcode: u32,
    pub target: u32,
    pub value1: u32,
    pub value2: u32,
}

impl DiffRecord {
    pub fn new(opcode: u32, target: u32, value1: u32, value2: u32) -> Self {
        Self {
            opcode,
            target,
            value1,
            value2,
        }
    }

    pub fn to_bytes(&self) -> [u8; DIFF_RECORD_SIZE as usize] {
        let mut bytes = [0u8; DIFF_RECORD_SIZE as usize];
        bytes[0..4].copy_from_slice(&self.opcode.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.target.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.value1.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.value2.to_le_bytes());
        bytes
    }
}

/// Decoded diff operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    /// Replace content with text from the fetch buffer
    SetText { target: u32, offset: u32, len: u32 },
    /// Name at `string[0..name_len]`, value right after it. Zero-length
    /// value removes the attribute.
    SetAttr { target: u32, name_len: u32, value_len: u32 },
    SetTransform { target: u32, x: i32, y: i32 },
    /// Tag name at `string[0..tag_len]`
    CreateElement { id: u32, parent: u32, tag_len: u32 },
    RemoveChild { target: u32 },
    /// Markup from the fetch buffer
    SetInnerHtml { target: u32, offset: u32, len: u32 },
    RemoveChildren { target: u32 },
}

impl DiffOp {
    /// `None` for opcodes outside the table
    pub fn decode(record: DiffRecord) -> Option<Self> {
        let DiffRecord {
            opcode,
            target,
            value1,
            value2,
        } = record;
        let op = match opcode {
            OP_SET_TEXT => DiffOp::SetText {
                target,
                offset: value1,
                len: value2,
            },
            OP_SET_ATTR => DiffOp::SetAttr {
                target,
                name_len: value1,
                value_len: value2,
            },
            OP_SET_TRANSFORM => DiffOp::SetTransform {
                target,
                x: value1 as i32,
                y: value2 as i32,
            },
            OP_CREATE_ELEMENT => DiffOp::CreateElement {
                id: target,
                parent: value1,
                tag_len: value2,
            },
            OP_REMOVE_CHILD => DiffOp::RemoveChild { target },
            OP_SET_INNER_HTML => DiffOp::SetInnerHtml {
                target,
                offset: value1,
                len: value2,
            },
            OP_REMOVE_CHILDREN => DiffOp::RemoveChildren { target },
            _ => return None,
        };
        Some(op)
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub applied: usize,
    pub skipped: usize,
}

/// Records decoded from one batch; a count byte caps a batch at 255
pub type DiffBatch = SmallVec<[DiffRecord; 32]>;

/// Read the live records of the diff buffer. The count is clamped to what
/// fits in the buffer.
pub fn read_records(view: &MemoryView<'_>, diff: Region) -> DiffBatch {
    let Ok(count) = view.region_u8(diff, 0) else {
        return DiffBatch::new();
    };
    let capacity = diff.capacity.saturating_sub(DIFF_HEADER_SIZE) / DIFF_RECORD_SIZE;
    let count = (count as u32).min(capacity);

    (0..count)
        .filter_map(|i| {
            let offset = DIFF_HEADER_SIZE + i * DIFF_RECORD_SIZE;
            let raw = view.region_bytes(diff, offset, DIFF_RECORD_SIZE).ok()?;
            let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
            Some(DiffRecord::new(word(0), word(4), word(8), word(12)))
        })
        .collect()
}

/// Apply every pending record in the guest's diff buffer, then reset its
/// count to zero.
pub fn apply_pending(host: &mut HostContext, memory: &mut [u8]) -> DiffStats {
    let Some(layout) = host.layout() else {
        return DiffStats::default();
    };
    let records = read_records(&MemoryView::new(memory), layout.diff);

    let mut stats = DiffStats::default();
    {
        let view = MemoryView::new(memory);
        for record in &records {
            let applied = match DiffOp::decode(*record) {
                Some(op) => apply_op(host, &view, layout.fetch, layout.string, op),
                None => {
                    debug!(opcode = record.opcode, "unknown diff opcode");
                    false
                }
            };
            if applied {
                stats.applied += 1;
            } else {
                stats.skipped += 1;
            }
        }
    }

    if MemoryViewMut::new(memory).write_region(layout.diff, 0, &[0]).is_err() {
        debug!("diff buffer count reset out of bounds");
    }
    trace!(applied = stats.applied, skipped = stats.skipped, "diff batch");
    stats
}

/// Apply a single operation. Returns false when it was a no-op.
pub fn apply_op(
    host: &mut HostContext,
    view: &MemoryView<'_>,
    fetch: Region,
    string: Region,
    op: DiffOp,
) -> bool {
    match op {
        DiffOp::SetText { target, offset, len } => {
            let Some(node) = host.registry.get(target) else {
                return missing(op);
            };
            let text = if len == 0 {
                String::new()
            } else {
                match view.region_string(fetch, offset, len) {
                    Ok(text) => text.into_owned(),
                    Err(e) => return malformed(op, e),
                }
            };
            host.release_descendants(target);
            host.tree.set_text_content(node, &text).is_ok()
        }

        DiffOp::SetAttr {
            target,
            name_len,
            value_len,
        } => {
            let Some(node) = host.registry.get(target) else {
                return missing(op);
            };
            if name_len == 0 {
                return malformed(op, "empty attribute name");
            }
            let name = match view.region_string(string, 0, name_len) {
                Ok(name) => name,
                Err(e) => return malformed(op, e),
            };
            if value_len == 0 {
                return host.tree.remove_attribute(node, &name).is_ok();
            }
            let value = match view.region_string(string, name_len, value_len) {
                Ok(value) => value,
                Err(e) => return malformed(op, e),
            };
            match host.tree.set_attribute(node, &name, &value) {
                Ok(()) => true,
                Err(e) => malformed(op, e),
            }
        }

        DiffOp::SetTransform { target, x, y } => {
            let Some(node) = host.registry.get(target) else {
                return missing(op);
            };
            host.tree.set_transform(node, Translate::new(x, y)).is_ok()
        }

        DiffOp::CreateElement { id, parent, tag_len } => {
            if id == ROOT_IDENTIFIER || tag_len == 0 {
                return malformed(op, "reserved identifier or empty tag");
            }
            let Some(parent_node) = host.registry.get(parent) else {
                return missing(op);
            };
            let tag = match view.region_string(string, 0, tag_len) {
                Ok(tag) => tag,
                Err(e) => return malformed(op, e),
            };
            let element = match host.tree.create_element(&tag) {
                Ok(element) => element,
                Err(e) => return malformed(op, e),
            };
            let id_text = id.to_string();
            let attached = host
                .tree
                .set_attribute(element, NODE_ID_ATTR, &id_text)
                .and_then(|_| host.tree.set_attribute(element, WASM_MARKER_ATTR, ""))
                .and_then(|_| host.tree.append_child(parent_node, element));
            if let Err(e) = attached {
                let _ = host.tree.remove(element);
                return malformed(op, e);
            }
            // A reused identifier re-points at the new element
            if host.registry.contains(id) {
                host.release_entry(id);
            }
            host.registry.insert(id, element);
            true
        }

        DiffOp::RemoveChild { target } => {
            if target == ROOT_IDENTIFIER {
                return malformed(op, "mount root cannot be removed");
            }
            let Some(node) = host.registry.get(target) else {
                return missing(op);
            };
            host.release_subtree_entries(target);
            host.tree.remove(node).is_ok()
        }

        DiffOp::SetInnerHtml { target, offset, len } => {
            let Some(node) = host.registry.get(target) else {
                return missing(op);
            };
            let html = if len == 0 {
                String::new()
            } else {
                match view.region_string(fetch, offset, len) {
                    Ok(html) => html.into_owned(),
                    Err(e) => return malformed(op, e),
                }
            };
            host.release_descendants(target);
            if host.tree.remove_children(node).is_err() {
                return false;
            }
            parse_fragment(&mut host.tree, node, &html).is_ok()
        }

        DiffOp::RemoveChildren { target } => {
            let Some(node) = host.registry.get(target) else {
                return missing(op);
            };
            host.release_descendants(target);
            host.tree.remove_children(node).is_ok()
        }
    }
}

fn missing(op: DiffOp) -> bool {
    debug!(?op, "diff target not registered");
    false
}

fn malformed(op: DiffOp, reason: impl std::fmt::Display) -> bool {
    debug!(?op, %reason, "diff record skipped");
    false
}
