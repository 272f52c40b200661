//! HTML fragment parser
//!
//! Builds host-tree nodes from markup, appending them under a parent the
//! way `innerHTML` assignment does. The parser is lenient and small: a stack
//! of open elements, void and raw-text elements, character references.
//! It is not the full HTML5 tree construction algorithm (no implied end
//! tags, no foster parenting), and it never fails on malformed input:
//! unparseable markup degrades to text.

use std::borrow::Cow;

use crate::arena::DomArena;
use crate::error::Result;
use crate::types::{is_valid_name, NodeId, RAW_TEXT_ELEMENTS, VOID_ELEMENTS};

/// Parse `html` and append the resulting nodes as children of `parent`.
///
/// Returns the top-level nodes that were appended, in order.
pub fn parse_fragment(arena: &mut DomArena, parent: NodeId, html: &str) -> Result<Vec<NodeId>> {
    arena.get(parent)?;
    let mut parser = FragmentParser {
        arena,
        input: html,
        pos: 0,
        open: vec![parent],
        top_level: Vec::new(),
    };
    parser.run()?;
    Ok(parser.top_level)
}

struct FragmentParser<'a> {
    arena: &'a mut DomArena,
    input: &'a str,
    pos: usize,
    /// Stack of open elements; index 0 is the fragment parent
    open: Vec<NodeId>,
    top_level: Vec<NodeId>,
}

impl<'a> FragmentParser<'a> {
    fn run(&mut self) -> Result<()> {
        while self.pos < self.input.len() {
            let rest = &self.input[self.pos..];
            if rest.starts_with("<!--") {
                self.comment();
            } else if rest.starts_with("</") {
                self.end_tag();
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                // Doctype / processing instruction: dropped
                self.pos += rest.find('>').map_or(rest.len(), |i| i + 1);
            } else if rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                self.start_tag()?;
            } else {
                self.text()?;
            }
        }
        Ok(())
    }

    fn current(&self) -> NodeId {
        *self.open.last().unwrap_or(&self.open[0])
    }

    fn insert(&mut self, node: NodeId) -> Result<()> {
        let parent = self.current();
        self.arena.append_child(parent, node)?;
        if self.open.len() == 1 {
            self.top_level.push(node);
        }
        Ok(())
    }

    fn text(&mut self) -> Result<()> {
        let rest = &self.input[self.pos..];
        // A '<' that does not open markup is plain text
        let skip = usize::from(rest.starts_with('<'));
        let end = rest[skip..].find('<').map_or(rest.len(), |i| i + skip);
        let raw = &rest[..end];
        self.pos += end;

        // Merge with a preceding text sibling, as the DOM parser does
        let parent = self.current();
        let last = self.arena.children(parent)?.last().copied();
        let decoded = decode_entities(raw);
        if let Some(last) = last {
            let node = self.arena.get_mut(last)?;
            if node.is_text() {
                node.node_value.push_str(&decoded);
                return Ok(());
            }
        }
        let id = self.arena.create_text(&decoded);
        self.insert(id)
    }

    fn comment(&mut self) {
        let body_start = self.pos + 4;
        let (body_end, next) = match self.input[body_start..].find("-->") {
            Some(i) => (body_start + i, body_start + i + 3),
            None => (self.input.len(), self.input.len()),
        };
        let id = self.arena.create_comment(&self.input[body_start..body_end]);
        self.pos = next;
        let _ = self.insert(id);
    }

    fn end_tag(&mut self) {
        let rest = &self.input[self.pos + 2..];
        let close = rest.find('>').map_or(rest.len(), |i| i + 1);
        let name = rest[..close]
            .trim_end_matches('>')
            .trim()
            .to_ascii_lowercase();
        self.pos += 2 + close;

        // Pop to the matching open element; stray end tags are ignored
        if let Some(depth) = self.open.iter().skip(1).rposition(|id| {
            self.arena
                .get(*id)
                .map(|node| node.node_name == name)
                .unwrap_or(false)
        }) {
            self.open.truncate(depth + 1);
        }
    }

    fn start_tag(&mut self) -> Result<()> {
        let bytes = self.input.as_bytes();
        let mut cursor = self.pos + 1;
        while cursor < bytes.len() && !is_tag_delimiter(bytes[cursor]) {
            cursor += 1;
        }
        let name = self.input[self.pos + 1..cursor].to_ascii_lowercase();

        let element = match self.arena.create_element(&name) {
            Ok(id) => id,
            Err(_) => return self.text(),
        };

        let mut self_closing = false;
        loop {
            while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
                cursor += 1;
            }
            if cursor >= bytes.len() {
                break;
            }
            match bytes[cursor] {
                b'>' => {
                    cursor += 1;
                    break;
                }
                b'/' => {
                    self_closing = bytes.get(cursor + 1) == Some(&b'>');
                    cursor += 1;
                    continue;
                }
                _ => {}
            }

            let name_start = cursor;
            while cursor < bytes.len()
                && !bytes[cursor].is_ascii_whitespace()
                && !matches!(bytes[cursor], b'=' | b'>' | b'/')
            {
                cursor += 1;
            }
            let attr_name = &self.input[name_start..cursor];
            if cursor == name_start {
                // Lone '=' or similar junk
                cursor += 1;
                continue;
            }

            let mut value: Cow<'_, str> = Cow::Borrowed("");
            if bytes.get(cursor) == Some(&b'=') {
                cursor += 1;
                match bytes.get(cursor) {
                    Some(&quote) if quote == b'"' || quote == b'\'' => {
                        let value_start = cursor + 1;
                        let value_end = self.input[value_start..]
                            .find(quote as char)
                            .map_or(self.input.len(), |i| value_start + i);
                        value = decode_entities(&self.input[value_start..value_end]);
                        cursor = (value_end + 1).min(self.input.len());
                    }
                    _ => {
                        let value_start = cursor;
                        while cursor < bytes.len()
                            && !bytes[cursor].is_ascii_whitespace()
                            && bytes[cursor] != b'>'
                        {
                            cursor += 1;
                        }
                        value = decode_entities(&self.input[value_start..cursor]);
                    }
                }
            }

            // First occurrence wins; invalid names are dropped
            let duplicate = self
                .arena
                .get(element)?
                .has_attr(&attr_name.to_ascii_lowercase());
            if is_valid_name(attr_name) && !duplicate {
                self.arena.set_attribute(element, attr_name, &value)?;
            }
        }
        self.pos = cursor;
        self.insert(element)?;

        if VOID_ELEMENTS.contains(&name.as_str()) || self_closing {
            return Ok(());
        }
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            return self.raw_text(element, &name);
        }
        self.open.push(element);
        Ok(())
    }

    fn raw_text(&mut self, element: NodeId, name: &str) -> Result<()> {
        let rest = &self.input[self.pos..];
        let closing = format!("</{name}");
        let end = rest
            .to_ascii_lowercase()
            .find(&closing)
            .unwrap_or(rest.len());
        let content = &rest[..end];
        if !content.is_empty() {
            let text = if matches!(name, "textarea" | "title") {
                decode_entities(content)
            } else {
                Cow::Borrowed(content)
            };
            let id = self.arena.create_text(&text);
            self.arena.append_child(element, id)?;
        }

        let after = &rest[end..];
        self.pos += end + after.find('>').map_or(after.len(), |i| i + 1);
        Ok(())
    }
}

fn is_tag_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == b'>' || byte == b'/'
}

/// Decode character references (`&amp;`, `&#233;`, `&#x1F600;`, ...).
/// Unknown references are kept verbatim.
pub fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest[1..]
            .find(';')
            .filter(|end| *end <= 32)
            .and_then(|end| decode_reference(&rest[1..end + 1]).map(|c| (c, end + 2)));
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_reference(reference: &str) -> Option<char> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    let ch = match reference {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        _ => return None,
    };
    Some(ch)
}
