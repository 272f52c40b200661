//! Event capture: which host events reach the guest
//!
//! Capture is document-level. A kind is delivered when it is in the
//! configured default set or when the guest holds at least one live
//! listener for it. Listeners are bound to a node identifier and die with
//! that node.
//!
//! The record itself carries no listener id. During `process_event` the
//! guest reads the listeners the event reached from
//! `HostContext::event_listeners`: those bound to the target or one of its
//! ancestors, innermost first. Window-level kinds reach every listener of
//! their kind.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use tracing::debug;
use ward_dom::{DomArena, NodeId};

use crate::events::{EventKind, EventRecord, HostEvent};
use crate::registry::{NodeRegistry, ROOT_IDENTIFIER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub identifier: u32,
    pub kind: EventKind,
}

#[derive(Debug, Default)]
pub struct EventCapture {
    defaults: AHashSet<EventKind>,
    listeners: AHashMap<u32, Listener>,
}

impl EventCapture {
    pub fn new(defaults: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            defaults: defaults.into_iter().collect(),
            listeners: AHashMap::new(),
        }
    }

    /// Whether events of this kind are delivered to the guest
    pub fn wants(&self, kind: EventKind) -> bool {
        self.defaults.contains(&kind) || self.listeners.values().any(|l| l.kind == kind)
    }

    /// Register a listener. Re-using a listener id replaces the old binding.
    pub fn add_listener(&mut self, listener_id: u32, identifier: u32, kind: EventKind) {
        debug!(listener_id, identifier, kind = kind.name(), "add event listener");
        self.listeners.insert(listener_id, Listener { identifier, kind });
    }

    pub fn remove_listener(&mut self, listener_id: u32) -> Option<Listener> {
        self.listeners.remove(&listener_id)
    }

    /// Drop every listener bound to any of the given identifiers
    pub fn release_nodes(&mut self, identifiers: &[u32]) -> usize {
        if identifiers.is_empty() || self.listeners.is_empty() {
            return 0;
        }
        let doomed: AHashSet<u32> = identifiers.iter().copied().collect();
        let before = self.listeners.len();
        self.listeners
            .retain(|_, listener| !doomed.contains(&listener.identifier));
        before - self.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Listener ids an event reaches, innermost node first, ties by id.
    /// A missing or stale target counts as the mount root.
    pub fn matching(
        &self,
        event: &HostEvent,
        tree: &DomArena,
        registry: &NodeRegistry,
        mount: NodeId,
    ) -> SmallVec<[u32; 4]> {
        let kind = event.kind();
        let mut candidates: Vec<(u32, &Listener)> = self
            .listeners
            .iter()
            .filter(|(_, listener)| listener.kind == kind)
            .map(|(id, listener)| (*id, listener))
            .collect();
        if candidates.is_empty() {
            return SmallVec::new();
        }

        if kind.is_window_level() {
            candidates.sort_unstable_by_key(|(id, _)| *id);
            return candidates.into_iter().map(|(id, _)| id).collect();
        }

        let start = event
            .target()
            .filter(|node| tree.exists(*node))
            .unwrap_or(mount);
        let mut reached: Vec<(usize, u32)> = Vec::new();
        let mut current = Some(start);
        let mut depth = 0;
        while let Some(node) = current {
            if let Some(identifier) = registry.identifier_of(node) {
                reached.extend(
                    candidates
                        .iter()
                        .filter(|(_, listener)| listener.identifier == identifier)
                        .map(|(id, _)| (depth, *id)),
                );
            }
            current = tree.parent(node);
            depth += 1;
        }
        reached.sort_unstable();
        reached.into_iter().map(|(_, id)| id).collect()
    }

    /// Encode an event, resolving its target through the registry.
    /// `None` when the guest has not opted into the kind.
    pub fn encode(&self, event: &HostEvent, registry: &NodeRegistry) -> Option<EventRecord> {
        let kind = event.kind();
        if !self.wants(kind) {
            return None;
        }
        let target = event
            .target()
            .and_then(|node| registry.identifier_of(node))
            .unwrap_or(ROOT_IDENTIFIER);
        Some(event.to_record(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_opt_in() {
        let mut capture = EventCapture::new([EventKind::Click]);
        assert!(capture.wants(EventKind::Click));
        assert!(!capture.wants(EventKind::Scroll));

        capture.add_listener(1, 5, EventKind::Scroll);
        assert!(capture.wants(EventKind::Scroll));

        assert!(capture.remove_listener(1).is_some());
        assert!(!capture.wants(EventKind::Scroll));
    }

    #[test]
    fn test_listeners_die_with_their_node() {
        let mut capture = EventCapture::default();
        capture.add_listener(1, 5, EventKind::Scroll);
        capture.add_listener(2, 6, EventKind::Resize);
        capture.add_listener(3, 5, EventKind::Touch);

        assert_eq!(capture.release_nodes(&[5, 9]), 2);
        assert_eq!(capture.listener_count(), 1);
        assert!(capture.wants(EventKind::Resize));
    }

    #[test]
    fn test_matching_follows_the_ancestor_path() {
        let mut tree = DomArena::new();
        let mount = tree.create_element("main").unwrap();
        let list = tree.create_element("ul").unwrap();
        let item = tree.create_element("li").unwrap();
        let other = tree.create_element("p").unwrap();
        tree.append_child(tree.document(), mount).unwrap();
        tree.append_child(mount, list).unwrap();
        tree.append_child(list, item).unwrap();
        tree.append_child(mount, other).unwrap();
        let mut registry = NodeRegistry::new();
        registry.register_root(mount);
        registry.insert(1, list);
        registry.insert(2, item);
        registry.insert(3, other);

        let mut capture = EventCapture::new([EventKind::Click]);
        capture.add_listener(10, ROOT_IDENTIFIER, EventKind::Click);
        capture.add_listener(11, 1, EventKind::Click);
        capture.add_listener(12, 2, EventKind::Click);
        capture.add_listener(13, 3, EventKind::Click);
        capture.add_listener(14, 2, EventKind::Input);
        capture.add_listener(20, 3, EventKind::Resize);

        let click = |target| HostEvent::Click { target, x: 0, y: 0 };
        let reached = capture.matching(&click(Some(item)), &tree, &registry, mount);
        assert_eq!(reached.as_slice(), &[12, 11, 10]);

        let reached = capture.matching(&click(None), &tree, &registry, mount);
        assert_eq!(reached.as_slice(), &[10]);

        let resize = HostEvent::Resize { width: 1, height: 1 };
        assert_eq!(capture.matching(&resize, &tree, &registry, mount).as_slice(), &[20]);
    }

    #[test]
    fn test_unregistered_target_resolves_to_zero() {
        let mut tree = DomArena::new();
        let known = tree.create_element("button").unwrap();
        let unknown = tree.create_element("button").unwrap();
        let mut registry = NodeRegistry::new();
        registry.insert(12, known);
        let capture = EventCapture::new([EventKind::Click]);

        let hit = capture
            .encode(&HostEvent::Click { target: Some(known), x: 1, y: 2 }, &registry)
            .unwrap();
        assert_eq!(hit.target, 12);

        let miss = capture
            .encode(&HostEvent::Click { target: Some(unknown), x: 1, y: 2 }, &registry)
            .unwrap();
        assert_eq!(miss.target, 0);

        assert!(capture
            .encode(&HostEvent::Resize { width: 1, height: 1 }, &registry)
            .is_none());
    }
}
