//! Headless geometry
//!
//! There is no style engine behind the host tree, so boxes follow one
//! fixed rule set:
//!
//! - every element is a block, stacked below its preceding siblings
//! - a block is as wide as the viewport unless it carries a `width`
//!   attribute, and as tall as its content unless it carries `height`
//! - text wraps at `CHAR_ADVANCE` per character into `LINE_HEIGHT` lines
//! - a `translate` transform shifts the box and everything inside it
//! - `script`, `style`, `template` and `hidden` elements take no space

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::types::{DomNode, DomRect, NodeId, NodeType};

pub const LINE_HEIGHT: f64 = 16.0;
pub const CHAR_ADVANCE: f64 = 8.0;

const NOT_RENDERED: &[&str] = &["script", "style", "template", "head", "title"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024.0,
            height: 768.0,
        }
    }
}

/// Box of one element plus its scrollable extent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurement {
    pub bounds: DomRect,
    pub scroll_width: f64,
    pub scroll_height: f64,
}

impl Measurement {
    /// Six little-endian f64s: left, top, width, height, scroll width,
    /// scroll height
    pub fn to_bytes(&self) -> [u8; 48] {
        let fields = [
            self.bounds.x,
            self.bounds.y,
            self.bounds.width,
            self.bounds.height,
            self.scroll_width,
            self.scroll_height,
        ];
        let mut bytes = [0u8; 48];
        for (chunk, value) in bytes.chunks_exact_mut(8).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }
}

/// Measure an element against `viewport`
pub fn measure(arena: &DomArena, node_id: NodeId, viewport: Viewport) -> Result<Measurement> {
    let node = arena.get(node_id)?;
    if !node.is_element() {
        return Err(DomError::InvalidNodeType {
            expected: "element",
            actual: node.node_type.name(),
        });
    }

    let width = explicit(node, "width").unwrap_or(viewport.width);
    let line_width = viewport.width;
    let content = content_height(arena, node, line_width)?;
    let height = if takes_space(node) {
        explicit(node, "height").unwrap_or(content)
    } else {
        0.0
    };

    let (x, y) = origin(arena, node_id, line_width)?;
    Ok(Measurement {
        bounds: DomRect::new(x, y, width, height),
        scroll_width: width,
        scroll_height: height.max(content),
    })
}

fn explicit(node: &DomNode, name: &str) -> Option<f64> {
    node.attr(name)
        .and_then(|raw| raw.trim().trim_end_matches("px").parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
}

fn takes_space(node: &DomNode) -> bool {
    !(NOT_RENDERED.contains(&node.node_name.as_str()) || node.has_attr("hidden"))
}

fn text_height(text: &str, line_width: f64) -> f64 {
    if text.trim().is_empty() {
        return 0.0;
    }
    let per_line = (line_width / CHAR_ADVANCE).floor().max(1.0);
    let chars = text.chars().count() as f64;
    (chars / per_line).ceil() * LINE_HEIGHT
}

/// Sum of the children's outer heights
fn content_height(arena: &DomArena, node: &DomNode, line_width: f64) -> Result<f64> {
    let mut total = 0.0;
    for &child in &node.children_ids {
        total += outer_height(arena, child, line_width)?;
    }
    Ok(total)
}

/// Height a node occupies in its parent's flow
fn outer_height(arena: &DomArena, start: NodeId, line_width: f64) -> Result<f64> {
    // Pre-order walk, then fold heights bottom-up over the reversed order
    let mut order = Vec::new();
    let mut stack = vec![start];
    while let Some(node_id) = stack.pop() {
        let node = arena.get(node_id)?;
        order.push(node_id);
        if node.is_element() && takes_space(node) && explicit(node, "height").is_none() {
            stack.extend(node.children_ids.iter().copied());
        }
    }

    let mut heights: HashMap<NodeId, f64> = HashMap::with_capacity(order.len());
    for &node_id in order.iter().rev() {
        let node = arena.get(node_id)?;
        let height = match node.node_type {
            NodeType::Text => text_height(&node.node_value, line_width),
            NodeType::Element if !takes_space(node) => 0.0,
            NodeType::Element => match explicit(node, "height") {
                Some(height) => height,
                None => node
                    .children_ids
                    .iter()
                    .map(|child| heights.get(child).copied().unwrap_or(0.0))
                    .sum(),
            },
            NodeType::Comment | NodeType::Document => 0.0,
        };
        heights.insert(node_id, height);
    }
    Ok(heights.get(&start).copied().unwrap_or(0.0))
}

/// Top-left corner: preceding siblings push a box down at every level,
/// transforms shift it
fn origin(arena: &DomArena, node_id: NodeId, line_width: f64) -> Result<(f64, f64)> {
    let (mut x, mut y) = (0.0, 0.0);
    let mut current = node_id;
    loop {
        if let Some(transform) = arena.get(current)?.transform {
            x += f64::from(transform.x);
            y += f64::from(transform.y);
        }
        let Some(parent) = arena.parent(current) else {
            break;
        };
        for &sibling in arena.children(parent)? {
            if sibling == current {
                break;
            }
            y += outer_height(arena, sibling, line_width)?;
        }
        current = parent;
    }
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::parse_fragment;
    use crate::types::Translate;

    fn page(html: &str) -> (DomArena, NodeId) {
        let mut arena = DomArena::new();
        let root = arena.create_element("main").unwrap();
        arena.append_child(arena.document(), root).unwrap();
        parse_fragment(&mut arena, root, html).unwrap();
        (arena, root)
    }

    fn viewport() -> Viewport {
        Viewport {
            width: 80.0,
            height: 600.0,
        }
    }

    #[test]
    fn test_blocks_stack_and_text_wraps() {
        // 10 characters per line at width 80
        let (arena, root) = page("<h1>title</h1><p>twenty characters!!</p><div id=\"x\"></div>");
        let x = arena.find_by_id("x").unwrap();
        let p = arena.find_by_tag("p")[0];

        let paragraph = measure(&arena, p, viewport()).unwrap();
        assert_eq!(paragraph.bounds, DomRect::new(0.0, 16.0, 80.0, 32.0));

        let empty = measure(&arena, x, viewport()).unwrap();
        assert_eq!(empty.bounds, DomRect::new(0.0, 48.0, 80.0, 0.0));

        let whole = measure(&arena, root, viewport()).unwrap();
        assert_eq!(whole.bounds.height, 48.0);
    }

    #[test]
    fn test_explicit_size_and_transform() {
        let (mut arena, root) =
            page("<img width=\"40\" height=\"30\"><div height=\"10\"><p>long long text</p></div>");
        let img = arena.find_by_tag("img")[0];
        let div = arena.find_by_tag("div")[0];
        arena.set_transform(root, Translate::new(5, 7)).unwrap();

        let image = measure(&arena, img, viewport()).unwrap();
        assert_eq!(image.bounds, DomRect::new(5.0, 7.0, 40.0, 30.0));

        // Content overflows the fixed height
        let clipped = measure(&arena, div, viewport()).unwrap();
        assert_eq!(clipped.bounds, DomRect::new(5.0, 37.0, 80.0, 10.0));
        assert_eq!(clipped.scroll_height, 32.0);
    }

    #[test]
    fn test_unrendered_elements_take_no_space() {
        let (arena, _) = page("<script>var a = 1;</script><p hidden>gone</p><b>x</b>");
        let b = arena.find_by_tag("b")[0];
        assert_eq!(measure(&arena, b, viewport()).unwrap().bounds.y, 0.0);
    }

    #[test]
    fn test_measure_rejects_text_and_encodes_fields() {
        let (arena, root) = page("text");
        let text = arena.children(root).unwrap()[0];
        assert!(matches!(
            measure(&arena, text, viewport()),
            Err(DomError::InvalidNodeType { .. })
        ));

        let measurement = Measurement {
            bounds: DomRect::new(1.0, 2.0, 3.0, 4.0),
            scroll_width: 5.0,
            scroll_height: 6.0,
        };
        let bytes = measurement.to_bytes();
        assert_eq!(f64::from_le_bytes(bytes[8..16].try_into().unwrap()), 2.0);
        assert_eq!(f64::from_le_bytes(bytes[40..48].try_into().unwrap()), 6.0);
    }
}
