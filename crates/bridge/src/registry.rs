//! Node Registry - the identifier ⇄ element map shared with the guest
//!
//! The guest never sees host handles. It names elements by `u32`
//! identifiers; identifier 0 is the mount root. Entries are created by
//! CREATE_ELEMENT (guest-chosen identifier), by adoption of pre-existing
//! `data-wasm` elements at startup, or by `register` (next free identifier).
//!
//! Invariant: every entry points at a live element in the host tree.
//! Anything that detaches or frees a subtree goes through
//! `delete_subtree` / `delete_descendants` first.

use ahash::AHashMap;
use ward_dom::{DomArena, NodeId, NODE_ID_ATTR, WASM_MARKER_ATTR};

use crate::error::Result;

/// Identifier of the mount root
pub const ROOT_IDENTIFIER: u32 = 0;

#[derive(Debug)]
pub struct NodeRegistry {
    nodes: AHashMap<u32, NodeId>,
    identifiers: AHashMap<NodeId, u32>,
    next_identifier: u32,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: AHashMap::new(),
            identifiers: AHashMap::new(),
            next_identifier: 1,
        }
    }

    /// Bind identifier 0 to the mount root
    pub fn register_root(&mut self, root: NodeId) {
        self.insert(ROOT_IDENTIFIER, root);
    }

    /// Register an element, returning its identifier.
    ///
    /// Already-registered elements keep their identifier. A positive
    /// `data-node-id` attribute is adopted as-is unless another element
    /// already holds it; otherwise the next free identifier is assigned and
    /// written back to the attribute.
    pub fn register(&mut self, tree: &mut DomArena, node: NodeId) -> Result<u32> {
        if let Some(&id) = self.identifiers.get(&node) {
            return Ok(id);
        }

        let adopted = tree
            .get(node)?
            .attr(NODE_ID_ATTR)
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|id| *id > 0 && !self.nodes.contains_key(id));

        let id = match adopted {
            Some(id) => id,
            None => {
                let id = self.allocate();
                tree.set_attribute(node, NODE_ID_ATTR, &id.to_string())?;
                id
            }
        };
        self.insert(id, node);
        Ok(id)
    }

    /// Register every connected `data-wasm` element, in document order
    pub fn adopt_marked(&mut self, tree: &mut DomArena) -> Result<usize> {
        let marked = tree.find(|node| node.is_element() && node.has_attr(WASM_MARKER_ATTR));
        let mut adopted = 0;
        for node in marked {
            if self.identifiers.contains_key(&node) {
                continue;
            }
            self.register(tree, node)?;
            adopted += 1;
        }
        Ok(adopted)
    }

    /// Bind `id` to `node`, replacing whatever either side was bound to
    pub fn insert(&mut self, id: u32, node: NodeId) {
        if let Some(previous) = self.nodes.insert(id, node) {
            if previous != node {
                self.identifiers.remove(&previous);
            }
        }
        if let Some(previous) = self.identifiers.insert(node, id) {
            if previous != id {
                self.nodes.remove(&previous);
            }
        }
        if id >= self.next_identifier {
            self.next_identifier = id.saturating_add(1);
        }
    }

    pub fn get(&self, id: u32) -> Option<NodeId> {
        self.nodes.get(&id).copied()
    }

    pub fn identifier_of(&self, node: NodeId) -> Option<u32> {
        self.identifiers.get(&node).copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Remove a single entry. The element itself is untouched.
    pub fn delete(&mut self, id: u32) -> Option<NodeId> {
        let node = self.nodes.remove(&id)?;
        self.identifiers.remove(&node);
        Some(node)
    }

    /// Remove the entry for `id` and for every registered element below it.
    /// Returns the removed identifiers, root first.
    pub fn delete_subtree(&mut self, tree: &DomArena, id: u32) -> Vec<u32> {
        let mut removed = self.delete_descendants(tree, id);
        if self.delete(id).is_some() {
            removed.insert(0, id);
        }
        removed
    }

    /// Remove the entries of every registered element strictly below `id`
    pub fn delete_descendants(&mut self, tree: &DomArena, id: u32) -> Vec<u32> {
        let Some(root) = self.get(id) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        // Walks the host tree, so cost is the size of the subtree
        let _ = tree.traverse_df(root, |node| {
            if node.node_id == root {
                return Ok(());
            }
            if let Some(&descendant) = self.identifiers.get(&node.node_id) {
                removed.push(descendant);
            }
            Ok(())
        });

        for descendant in &removed {
            self.delete(*descendant);
        }
        removed
    }

    /// Live entry count, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Identifier `register` would assign next
    pub fn next_identifier(&self) -> u32 {
        self.next_identifier
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, NodeId)> + '_ {
        self.nodes.iter().map(|(id, node)| (*id, *node))
    }

    fn allocate(&mut self) -> u32 {
        while self.nodes.contains_key(&self.next_identifier) || self.next_identifier == 0 {
            self.next_identifier = self.next_identifier.wrapping_add(1);
        }
        let id = self.next_identifier;
        self.next_identifier = id.wrapping_add(1);
        id
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
