//! Page location and session history

use url::Url;

use crate::error::Result;

/// Session history entries kept; the oldest are dropped past this
pub const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone)]
pub struct Location {
    entries: Vec<Url>,
    current: usize,
}

impl Location {
    pub fn new(page_url: &str) -> Result<Self> {
        Ok(Self {
            entries: vec![Url::parse(page_url)?],
            current: 0,
        })
    }

    pub fn url(&self) -> &Url {
        // `entries` is never empty and `current` always indexes it
        &self.entries[self.current]
    }

    pub fn href(&self) -> &str {
        self.url().as_str()
    }

    pub fn origin(&self) -> String {
        self.url().origin().ascii_serialization()
    }

    /// Fragment without the leading `#`; empty when there is none
    pub fn hash(&self) -> &str {
        self.url().fragment().unwrap_or("")
    }

    /// Navigate to a new fragment; creates a history entry
    pub fn set_hash(&mut self, hash: &str) {
        let hash = hash.strip_prefix('#').unwrap_or(hash);
        let mut next = self.url().clone();
        next.set_fragment(Some(hash));
        self.push(next);
    }

    /// Drop the fragment, keeping path and query, without a history entry
    pub fn clear_hash(&mut self) {
        let mut next = self.url().clone();
        next.set_fragment(None);
        self.entries[self.current] = next;
    }

    /// `history.pushState`: `url` is resolved against the current URL.
    /// Cross-origin targets are refused.
    pub fn push_state(&mut self, url: &str) -> Result<bool> {
        let next = self.url().join(url)?;
        if next.origin() != self.url().origin() {
            return Ok(false);
        }
        self.push(next);
        Ok(true)
    }

    /// `history.replaceState`
    pub fn replace_state(&mut self, url: &str) -> Result<bool> {
        let next = self.url().join(url)?;
        if next.origin() != self.url().origin() {
            return Ok(false);
        }
        self.entries[self.current] = next;
        Ok(true)
    }

    /// Step back one entry. Returns false at the start of history.
    pub fn back(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        true
    }

    pub fn history_len(&self) -> usize {
        self.entries.len()
    }

    fn push(&mut self, next: Url) {
        self.entries.truncate(self.current + 1);
        self.entries.push(next);
        if self.entries.len() > MAX_HISTORY {
            let excess = self.entries.len() - MAX_HISTORY;
            self.entries.drain(..excess);
        }
        self.current = self.entries.len() - 1;
    }
}
