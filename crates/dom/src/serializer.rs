//! Host tree serializers
//!
//! This module handles:
//! - Markup serialization (`innerHTML` / `outerHTML` equivalents)
//! - The safe-tree stream: a compact, self-describing opcode encoding of a
//!   filtered tree, handed to the guest instead of live nodes
//!
//! ## Safe-tree stream
//!
//! ```text
//! ELEMENT_OPEN  = 1  tag_len:u8 tag attr_count:u8 { name_len:u8 name value_len:u16le value }*
//! ELEMENT_CLOSE = 2
//! TEXT          = 3  len:u16le bytes
//! ```

use crate::arena::DomArena;
use crate::error::Result;
use crate::types::*;

pub const SAFE_ELEMENT_OPEN: u8 = 1;
pub const SAFE_ELEMENT_CLOSE: u8 = 2;
pub const SAFE_TEXT: u8 = 3;

/// Serialize the children of a node as markup
pub fn inner_html(arena: &DomArena, node_id: NodeId) -> Result<String> {
    let mut output = String::new();
    for &child in arena.children(node_id)? {
        write_markup(arena, child, &mut output)?;
    }
    Ok(output)
}

/// Serialize a node and its subtree as markup
pub fn outer_html(arena: &DomArena, node_id: NodeId) -> Result<String> {
    let mut output = String::new();
    write_markup(arena, node_id, &mut output)?;
    Ok(output)
}

/// One pending step of an iterative tree walk. Closing steps sit below
/// an element's children on the stack, so they pop after the subtree.
enum MarkupStep<'a> {
    Node(NodeId),
    /// Child of a raw-text element: text is written verbatim
    RawChild(NodeId),
    Close(&'a str),
}

fn write_markup(arena: &DomArena, start: NodeId, output: &mut String) -> Result<()> {
    let mut stack = vec![MarkupStep::Node(start)];

    while let Some(step) = stack.pop() {
        let node_id = match step {
            MarkupStep::Close(name) => {
                output.push_str("</");
                output.push_str(name);
                output.push('>');
                continue;
            }
            MarkupStep::RawChild(node_id) => {
                let node = arena.get(node_id)?;
                if node.is_text() {
                    output.push_str(&node.node_value);
                    continue;
                }
                node_id
            }
            MarkupStep::Node(node_id) => node_id,
        };

        let node = arena.get(node_id)?;
        match node.node_type {
            NodeType::Element => {
                output.push('<');
                output.push_str(&node.node_name);
                for (name, value) in &node.attributes {
                    output.push(' ');
                    output.push_str(name);
                    output.push_str("=\"");
                    escape_into(value, true, output);
                    output.push('"');
                }
                if let Some(transform) = node.transform {
                    output.push_str(" style=\"transform: ");
                    output.push_str(&transform.to_css());
                    output.push('"');
                }
                output.push('>');

                if VOID_ELEMENTS.contains(&node.node_name.as_str()) {
                    continue;
                }
                let raw = RAW_TEXT_ELEMENTS.contains(&node.node_name.as_str());
                stack.push(MarkupStep::Close(&node.node_name));
                for &child_id in node.children_ids.iter().rev() {
                    stack.push(if raw {
                        MarkupStep::RawChild(child_id)
                    } else {
                        MarkupStep::Node(child_id)
                    });
                }
            }
            NodeType::Text => escape_into(&node.node_value, false, output),
            NodeType::Comment => {
                output.push_str("<!--");
                output.push_str(&node.node_value);
                output.push_str("-->");
            }
            NodeType::Document => {
                for &child_id in node.children_ids.iter().rev() {
                    stack.push(MarkupStep::Node(child_id));
                }
            }
        }
    }
    Ok(())
}

fn escape_into(text: &str, attribute: bool, output: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '<' if !attribute => output.push_str("&lt;"),
            '>' if !attribute => output.push_str("&gt;"),
            '"' if attribute => output.push_str("&quot;"),
            '\u{a0}' => output.push_str("&nbsp;"),
            _ => output.push(ch),
        }
    }
}

/// Safe-tree encoder configuration
#[derive(Debug, Clone)]
pub struct SafeTreeConfig {
    /// Elements dropped together with their subtree
    pub blocked_elements: Vec<String>,
}

impl Default for SafeTreeConfig {
    fn default() -> Self {
        Self {
            blocked_elements: BLOCKED_ELEMENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Encodes a filtered subtree into the safe-tree stream
pub struct SafeTreeEncoder {
    config: SafeTreeConfig,
}

impl SafeTreeEncoder {
    pub fn new() -> Self {
        Self::with_config(SafeTreeConfig::default())
    }

    pub fn with_config(config: SafeTreeConfig) -> Self {
        Self { config }
    }

    /// Encode the children of `root` (the root itself is not emitted)
    pub fn encode_children(&self, arena: &DomArena, root: NodeId) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(256);
        for &child in arena.children(root)? {
            self.encode_node(arena, child, &mut output)?;
        }
        Ok(output)
    }

    fn encode_node(&self, arena: &DomArena, start: NodeId, output: &mut Vec<u8>) -> Result<()> {
        // `None` marks the close of the element opened just below it
        let mut stack = vec![Some(start)];

        while let Some(step) = stack.pop() {
            let Some(node_id) = step else {
                output.push(SAFE_ELEMENT_CLOSE);
                continue;
            };
            let node = arena.get(node_id)?;
            match node.node_type {
                NodeType::Text => {
                    let bytes = node.node_value.as_bytes();
                    // Empty and oversized text is skipped
                    if bytes.is_empty() || bytes.len() > u16::MAX as usize {
                        continue;
                    }
                    output.push(SAFE_TEXT);
                    output.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                    output.extend_from_slice(bytes);
                }
                NodeType::Element => {
                    let tag = node.node_name.as_str();
                    if self.is_blocked(tag) || tag.len() > u8::MAX as usize {
                        continue;
                    }

                    let attributes: Vec<_> = node
                        .attributes
                        .iter()
                        .filter(|(name, value)| {
                            is_safe_attribute_name(name)
                                && name.len() <= u8::MAX as usize
                                && value.len() <= u16::MAX as usize
                        })
                        .take(u8::MAX as usize)
                        .collect();

                    output.push(SAFE_ELEMENT_OPEN);
                    output.push(tag.len() as u8);
                    output.extend_from_slice(tag.as_bytes());
                    output.push(attributes.len() as u8);
                    for (name, value) in attributes {
                        output.push(name.len() as u8);
                        output.extend_from_slice(name.as_bytes());
                        output.extend_from_slice(&(value.len() as u16).to_le_bytes());
                        output.extend_from_slice(value.as_bytes());
                    }

                    stack.push(None);
                    stack.extend(node.children_ids.iter().rev().map(|&child| Some(child)));
                }
                // Comments and documents carry nothing the guest renders
                NodeType::Comment | NodeType::Document => {}
            }
        }
        Ok(())
    }

    fn is_blocked(&self, tag: &str) -> bool {
        self.config
            .blocked_elements
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(tag))
    }
}

impl Default for SafeTreeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Attribute names allowed into the safe-tree stream: `[A-Za-z0-9-]+`,
/// never `style`, never an event handler (`on*`).
pub fn is_safe_attribute_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower == "style" || lower.starts_with("on") {
        return false;
    }
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
