//! Selector matching for `query_selector`
//!
//! A deliberately small subset:
//!
//! ```text
//! list      = complex { "," complex }
//! complex   = compound { whitespace compound }      descendant combinator only
//! compound  = [ tag | "*" ] { "#" id | "." class | "[" name [ "=" value ] "]" }
//! ```
//!
//! Anything outside it is rejected with `InvalidSelector`, never guessed at.

use smallvec::SmallVec;

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::types::{is_valid_name, DomNode, NodeId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: SmallVec<[String; 2]>,
    attributes: SmallVec<[(String, Option<String>); 2]>,
}

impl Compound {
    fn matches(&self, node: &DomNode) -> bool {
        if !node.is_element() {
            return false;
        }
        if let Some(tag) = &self.tag {
            if node.node_name != *tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class = node.attr("class").unwrap_or("");
            if !self
                .classes
                .iter()
                .all(|wanted| class.split_ascii_whitespace().any(|c| c == wanted))
            {
                return false;
            }
        }
        self.attributes.iter().all(|(name, value)| match value {
            Some(value) => node.attr(name) == Some(value.as_str()),
            None => node.has_attr(name),
        })
    }
}

/// A parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Each alternative is a descendant chain, outermost compound first
    alternatives: Vec<Vec<Compound>>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || DomError::InvalidSelector(input.to_string());

        let mut alternatives = Vec::new();
        for alternative in split_outside_brackets(input, |c| c == ',') {
            let chain = split_outside_brackets(alternative, char::is_whitespace)
                .into_iter()
                .filter(|part| !part.is_empty())
                .map(parse_compound)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(invalid)?;
            if chain.is_empty() {
                return Err(invalid());
            }
            alternatives.push(chain);
        }
        Ok(Self { alternatives })
    }

    /// Whether `node_id` matches any alternative. Ancestors are looked up
    /// through the whole tree, not just below some scope.
    pub fn matches(&self, arena: &DomArena, node_id: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|chain| chain_matches(chain, arena, node_id))
    }

    /// First match in document order within `scope`, `scope` included
    pub fn first_match(&self, arena: &DomArena, scope: NodeId) -> Option<NodeId> {
        let mut stack = vec![scope];
        while let Some(node_id) = stack.pop() {
            let node = arena.get(node_id).ok()?;
            if self.matches(arena, node_id) {
                return Some(node_id);
            }
            stack.extend(node.children_ids.iter().rev().copied());
        }
        None
    }
}

fn chain_matches(chain: &[Compound], arena: &DomArena, node_id: NodeId) -> bool {
    let Some((last, ancestors)) = chain.split_last() else {
        return false;
    };
    match arena.get(node_id) {
        Ok(node) if last.matches(node) => {}
        _ => return false,
    }

    // Descendant-only chains can be matched greedily, innermost first
    let mut remaining = ancestors.iter().rev().peekable();
    let mut current = arena.parent(node_id);
    while let Some(compound) = remaining.peek() {
        let Some(ancestor) = current else {
            return false;
        };
        if arena.get(ancestor).is_ok_and(|node| compound.matches(node)) {
            remaining.next();
        }
        current = arena.parent(ancestor);
    }
    true
}

/// Split on `separator`, ignoring separators inside `[...]`
fn split_outside_brackets(input: &str, separator: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in input.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            c if depth == 0 && separator(c) => {
                parts.push(input[start..i].trim());
                start = i + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts
}

fn scan_name(text: &str, start: usize) -> usize {
    text[start..]
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .map_or(text.len(), |i| start + i)
}

fn parse_compound(text: &str) -> Option<Compound> {
    let mut compound = Compound::default();
    let mut pos = scan_name(text, 0);
    if pos > 0 {
        compound.tag = Some(text[..pos].to_ascii_lowercase());
    } else if text.starts_with('*') {
        pos = 1;
    }

    while pos < text.len() {
        let marker = text[pos..].chars().next()?;
        match marker {
            '#' | '.' => {
                let end = scan_name(text, pos + 1);
                if end == pos + 1 {
                    return None;
                }
                let name = text[pos + 1..end].to_string();
                if marker == '#' {
                    compound.id = Some(name);
                } else {
                    compound.classes.push(name);
                }
                pos = end;
            }
            '[' => {
                let close = pos + text[pos..].find(']')?;
                let inner = &text[pos + 1..close];
                let (name, value) = match inner.split_once('=') {
                    Some((name, value)) => (name.trim(), Some(unquote(value.trim())?)),
                    None => (inner.trim(), None),
                };
                if !is_valid_name(name) {
                    return None;
                }
                compound
                    .attributes
                    .push((name.to_ascii_lowercase(), value.map(str::to_string)));
                pos = close + 1;
            }
            _ => return None,
        }
    }
    Some(compound)
}

fn unquote(value: &str) -> Option<&str> {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote) {
            return inner.strip_suffix(quote);
        }
    }
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::parse_fragment;

    fn page() -> (DomArena, NodeId) {
        let mut arena = DomArena::new();
        let root = arena.create_element("main").unwrap();
        arena.append_child(arena.document(), root).unwrap();
        parse_fragment(
            &mut arena,
            root,
            "<nav class=\"menu top\"><a href=\"/\" id=\"home\">home</a></nav>\
             <section><p class=\"note\" title=\"a b\">x</p><a data-kind=\"ext\">out</a></section>",
        )
        .unwrap();
        (arena, root)
    }

    fn tag_of(arena: &DomArena, node: Option<NodeId>) -> Option<String> {
        node.map(|id| arena.get(id).unwrap().node_name.clone())
    }

    #[test]
    fn test_simple_selectors() {
        let (arena, root) = page();
        let first = |s: &str| Selector::parse(s).unwrap().first_match(&arena, root);

        assert_eq!(tag_of(&arena, first("a")), Some("a".into()));
        assert_eq!(first("#home"), arena.find_by_id("home"));
        assert_eq!(tag_of(&arena, first(".note")), Some("p".into()));
        assert_eq!(tag_of(&arena, first("nav.menu.top")), Some("nav".into()));
        assert_eq!(tag_of(&arena, first("[title=\"a b\"]")), Some("p".into()));
        assert_eq!(tag_of(&arena, first("*")), Some("main".into()));
        assert!(first(".missing").is_none());
    }

    #[test]
    fn test_descendant_and_list() {
        let (arena, root) = page();
        let first = |s: &str| Selector::parse(s).unwrap().first_match(&arena, root);

        let external = first("section a").unwrap();
        assert_eq!(arena.get(external).unwrap().attr("data-kind"), Some("ext"));
        assert_eq!(first("main  nav a"), arena.find_by_id("home"));
        assert!(first("section nav").is_none());
        // Document order decides between alternatives
        assert_eq!(first("[data-kind=ext], #home"), arena.find_by_id("home"));
    }

    #[test]
    fn test_rejects_unsupported_syntax() {
        for input in ["", "a > b", "a:hover", "#", "[=x]", "a,", "div::before"] {
            assert!(
                matches!(Selector::parse(input), Err(DomError::InvalidSelector(_))),
                "{input:?} should be rejected"
            );
        }
    }
}
