//! Arena-based host tree storage
//!
//! "Bad programmers worry about the code. Good programmers worry about
//! data structures and their relationships."
//!
//! This arena eliminates:
//! - Rc/Arc overhead (16 bytes per pointer)
//! - Recursive function calls (stack overflow risk)
//! - Parent/child reference cycles
//!
//! ## Memory Layout
//!
//! ```text
//! Arena: Vec<Slot>
//!        [Slot0][Slot1][Slot2]...
//!         ↑ (index, generation), not a pointer
//! ```
//!
//! Removed subtrees give their slots back to a free list. The slot's
//! generation is bumped on free, so stale `NodeId`s stop resolving.

use crate::error::{DomError, Result};
use crate::types::{is_valid_name, DomNode, NodeId, NodeType, SelectedFile, Translate};
use std::collections::VecDeque;

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<DomNode>,
}

/// Arena allocator and mutation API for the host tree
#[derive(Debug)]
pub struct DomArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    document: NodeId,
    live: usize,
}

impl DomArena {
    /// Create an arena holding an empty document node
    pub fn new() -> Self {
        Self::with_capacity(1024) // Pre-allocate for typical page
    }

    /// Create arena with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let mut arena = Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            document: NodeId::new(0, 0),
            live: 0,
        };
        arena.document = arena.alloc(NodeType::Document, "#document".to_string());
        arena
    }

    fn alloc(&mut self, node_type: NodeType, node_name: String) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let id = NodeId::new(index, slot.generation);
            slot.node = Some(DomNode::new(id, node_type, node_name));
            return id;
        }
        let id = NodeId::new(self.slots.len() as u32, 0);
        self.slots.push(Slot {
            generation: 0,
            node: Some(DomNode::new(id, node_type, node_name)),
        });
        id
    }

    fn release(&mut self, node_id: NodeId) {
        if let Some(slot) = self.slots.get_mut(node_id.index as usize) {
            if slot.generation == node_id.generation && slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(node_id.index);
                self.live -= 1;
            }
        }
    }

    /// The document node every connected node descends from
    pub fn document(&self) -> NodeId {
        self.document
    }

    /// Create a detached element. Tag names are lowercased.
    pub fn create_element(&mut self, tag: &str) -> Result<NodeId> {
        if !is_valid_name(tag) {
            return Err(DomError::InvalidName(tag.to_string()));
        }
        Ok(self.alloc(NodeType::Element, tag.to_ascii_lowercase()))
    }

    /// Create a detached text node
    pub fn create_text(&mut self, text: &str) -> NodeId {
        let id = self.alloc(NodeType::Text, "#text".to_string());
        if let Some(node) = self.slot_node_mut(id) {
            node.node_value = text.to_string();
        }
        id
    }

    /// Create a detached comment node
    pub fn create_comment(&mut self, text: &str) -> NodeId {
        let id = self.alloc(NodeType::Comment, "#comment".to_string());
        if let Some(node) = self.slot_node_mut(id) {
            node.node_value = text.to_string();
        }
        id
    }

    fn slot_node_mut(&mut self, node_id: NodeId) -> Option<&mut DomNode> {
        self.slots
            .get_mut(node_id.index as usize)
            .filter(|slot| slot.generation == node_id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Get node by ID (immutable)
    pub fn get(&self, node_id: NodeId) -> Result<&DomNode> {
        self.slots
            .get(node_id.index as usize)
            .filter(|slot| slot.generation == node_id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(DomError::NodeNotFound(node_id))
    }

    /// Get node by ID (mutable)
    pub fn get_mut(&mut self, node_id: NodeId) -> Result<&mut DomNode> {
        self.slot_node_mut(node_id)
            .ok_or(DomError::NodeNotFound(node_id))
    }

    /// Whether the handle still refers to a live node
    pub fn exists(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_ok()
    }

    fn element_mut(&mut self, node_id: NodeId) -> Result<&mut DomNode> {
        let node = self.get_mut(node_id)?;
        if node.node_type != NodeType::Element {
            return Err(DomError::InvalidNodeType {
                expected: NodeType::Element.name(),
                actual: node.node_type.name(),
            });
        }
        Ok(node)
    }

    /// Number of live nodes, document included
    pub fn len(&self) -> usize {
        self.live
    }

    /// True when only the document node is left
    pub fn is_empty(&self) -> bool {
        self.live <= 1
    }

    /// Get parent ID of a node
    pub fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.get(node_id).ok().and_then(|node| node.parent_id)
    }

    /// Get child IDs of a node
    pub fn children(&self, node_id: NodeId) -> Result<&[NodeId]> {
        Ok(&self.get(node_id)?.children_ids)
    }

    /// True when `node` is `ancestor` or lies inside it (DOM `contains`)
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// True when the node is reachable from the document
    pub fn is_connected(&self, node_id: NodeId) -> bool {
        self.exists(node_id) && self.contains(self.document, node_id)
    }

    /// Append `child` as the last child of `parent`, detaching it first
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let parent_type = self.get(parent)?.node_type;
        // A childless node can only be its own ancestor, so the upward walk
        // is skipped for leaves (keeps deep fragment parsing linear)
        let is_leaf = self.get(child)?.children_ids.is_empty();
        if !matches!(parent_type, NodeType::Element | NodeType::Document)
            || child == parent
            || (!is_leaf && self.contains(child, parent))
            || child == self.document
        {
            return Err(DomError::HierarchyRequest { parent, child });
        }

        self.detach(child)?;
        self.get_mut(parent)?.children_ids.push(child);
        self.get_mut(child)?.parent_id = Some(parent);
        Ok(())
    }

    /// Unlink a node from its parent. The subtree stays alive.
    pub fn detach(&mut self, node_id: NodeId) -> Result<()> {
        let Some(parent_id) = self.get(node_id)?.parent_id else {
            return Ok(());
        };
        if let Ok(parent) = self.get_mut(parent_id) {
            parent.children_ids.retain(|id| *id != node_id);
        }
        self.get_mut(node_id)?.parent_id = None;
        Ok(())
    }

    /// Detach a node and free its whole subtree. Returns freed node count.
    pub fn remove(&mut self, node_id: NodeId) -> Result<usize> {
        if node_id == self.document {
            return Err(DomError::HierarchyRequest {
                parent: node_id,
                child: node_id,
            });
        }
        self.detach(node_id)?;
        let doomed = self.subtree(node_id)?;
        for id in &doomed {
            self.release(*id);
        }
        Ok(doomed.len())
    }

    /// Free every child subtree of a node. Returns freed node count.
    pub fn remove_children(&mut self, node_id: NodeId) -> Result<usize> {
        let children: Vec<NodeId> = self.get(node_id)?.children_ids.to_vec();
        let mut freed = 0;
        for child in children {
            freed += self.remove(child)?;
        }
        Ok(freed)
    }

    /// All node IDs in the subtree rooted at `start`, pre-order, start first
    pub fn subtree(&self, start: NodeId) -> Result<Vec<NodeId>> {
        let mut ids = Vec::new();
        self.traverse_df(start, |node| {
            ids.push(node.node_id);
            Ok(())
        })?;
        Ok(ids)
    }

    /// Traverse tree depth-first (iterative, no recursion)
    pub fn traverse_df<F>(&self, start_id: NodeId, mut visit: F) -> Result<()>
    where
        F: FnMut(&DomNode) -> Result<()>,
    {
        let mut stack = vec![start_id];

        while let Some(node_id) = stack.pop() {
            let node = self.get(node_id)?;
            visit(node)?;

            // Push children in reverse order (so they're visited left-to-right)
            for &child_id in node.children_ids.iter().rev() {
                stack.push(child_id);
            }
        }

        Ok(())
    }

    /// Traverse tree breadth-first
    pub fn traverse_bf<F>(&self, start_id: NodeId, mut visit: F) -> Result<()>
    where
        F: FnMut(&DomNode) -> Result<()>,
    {
        let mut queue = VecDeque::new();
        queue.push_back(start_id);

        while let Some(node_id) = queue.pop_front() {
            let node = self.get(node_id)?;
            visit(node)?;
            queue.extend(node.children_ids.iter().copied());
        }

        Ok(())
    }

    /// Find connected nodes matching predicate, in document order
    pub fn find<F>(&self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&DomNode) -> bool,
    {
        let mut found = Vec::new();
        let _ = self.traverse_df(self.document, |node| {
            if predicate(node) {
                found.push(node.node_id);
            }
            Ok(())
        });
        found
    }

    /// Find first connected node matching predicate
    pub fn find_one<F>(&self, predicate: F) -> Option<NodeId>
    where
        F: Fn(&DomNode) -> bool,
    {
        self.find(predicate).into_iter().next()
    }

    /// Find all connected elements by tag name
    pub fn find_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.find(|node| node.is_element() && node.node_name.eq_ignore_ascii_case(tag))
    }

    /// Find element by ID attribute
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.find_one(|node| node.is_element() && node.attr("id") == Some(id))
    }

    /// Concatenated text of all descendant text nodes (DOM `textContent`)
    pub fn text_content(&self, node_id: NodeId) -> Result<String> {
        let mut text = String::new();
        self.traverse_df(node_id, |node| {
            if node.node_type == NodeType::Text {
                text.push_str(&node.node_value);
            }
            Ok(())
        })?;
        Ok(text)
    }

    /// Replace all children with a single text node (none for empty text).
    /// On a text node, replaces its data. Returns freed node count.
    pub fn set_text_content(&mut self, node_id: NodeId, text: &str) -> Result<usize> {
        let node = self.get_mut(node_id)?;
        if matches!(node.node_type, NodeType::Text | NodeType::Comment) {
            node.node_value = text.to_string();
            return Ok(0);
        }

        let freed = self.remove_children(node_id)?;
        if !text.is_empty() {
            let text_id = self.create_text(text);
            self.append_child(node_id, text_id)?;
        }
        Ok(freed)
    }

    /// Set (or overwrite) an attribute, keeping insertion order
    pub fn set_attribute(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        if !is_valid_name(name) {
            return Err(DomError::InvalidName(name.to_string()));
        }
        let name = name.to_ascii_lowercase();
        let node = self.element_mut(node_id)?;
        match node.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => node.attributes.push((name, value.to_string())),
        }
        Ok(())
    }

    /// Remove an attribute. Returns whether it was present.
    pub fn remove_attribute(&mut self, node_id: NodeId, name: &str) -> Result<bool> {
        let name = name.to_ascii_lowercase();
        let node = self.element_mut(node_id)?;
        let before = node.attributes.len();
        node.attributes.retain(|(key, _)| *key != name);
        Ok(node.attributes.len() != before)
    }

    pub fn set_transform(&mut self, node_id: NodeId, transform: Translate) -> Result<()> {
        self.element_mut(node_id)?.transform = Some(transform);
        Ok(())
    }

    /// Replace the file selection of a (file input) element
    pub fn set_files(&mut self, node_id: NodeId, files: Vec<SelectedFile>) -> Result<()> {
        self.element_mut(node_id)?.files = files;
        Ok(())
    }
}

impl Default for DomArena {
    fn default() -> Self {
        Self::new()
    }
}
