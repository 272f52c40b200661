//! Resource handle tables
//!
//! Large data (picked files, decompressed blobs) stays on the host side.
//! The guest holds a `u32` handle and pulls bytes through clamped reads.
//! Handles start at 1; 0 is the failure sentinel in every namespace.

use std::io::Read;
use std::sync::Arc;

use ahash::AHashMap;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use uuid::Uuid;

use crate::error::{CapabilityError, CapabilityResult};

/// Monotonic handle table. Handles are never 0 and never reused while live.
#[derive(Debug)]
pub struct HandleTable<T> {
    entries: AHashMap<u32, T>,
    next: u32,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
            next: 1,
        }
    }

    pub fn insert(&mut self, value: T) -> u32 {
        while self.next == 0 || self.entries.contains_key(&self.next) {
            self.next = self.next.wrapping_add(1);
        }
        let handle = self.next;
        self.next = handle.wrapping_add(1);
        self.entries.insert(handle, value);
        handle
    }

    pub fn get(&self, handle: u32) -> Option<&T> {
        self.entries.get(&handle)
    }

    pub fn remove(&mut self, handle: u32) -> Option<T> {
        self.entries.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes behind a file or blob handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteResource {
    pub name: Option<String>,
    pub data: Arc<[u8]>,
}

impl ByteResource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: None,
            data: data.into(),
        }
    }

    pub fn named(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: Some(name.into()),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u32 {
        self.data.len().min(u32::MAX as usize) as u32
    }

    /// Up to `len` bytes from `offset`; empty past the end
    pub fn read(&self, offset: u32, len: u32) -> &[u8] {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(len as usize).min(self.data.len());
        &self.data[start..end]
    }
}

pub type ResourceTable = HandleTable<ByteResource>;

impl HandleTable<ByteResource> {
    /// Size of the resource, 0 for an unknown handle
    pub fn size_of(&self, handle: u32) -> u32 {
        self.get(handle).map(ByteResource::size).unwrap_or(0)
    }

    /// Clamped read, empty for an unknown handle
    pub fn read(&self, handle: u32, offset: u32, len: u32) -> &[u8] {
        self.get(handle)
            .map(|resource| resource.read(offset, len))
            .unwrap_or(&[])
    }
}

/// Decompression formats, by wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Deflate,
    DeflateRaw,
}

impl Compression {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Compression::Gzip),
            1 => Some(Compression::Deflate),
            2 => Some(Compression::DeflateRaw),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Deflate => "deflate",
            Compression::DeflateRaw => "deflate-raw",
        }
    }
}

/// Inflate `data`. Blocking; run it off the guest's thread.
pub fn decompress(data: &[u8], method: Compression) -> CapabilityResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len().saturating_mul(3));
    let result = match method {
        Compression::Gzip => GzDecoder::new(data).read_to_end(&mut output),
        // "deflate" is the zlib-wrapped format
        Compression::Deflate => ZlibDecoder::new(data).read_to_end(&mut output),
        Compression::DeflateRaw => DeflateDecoder::new(data).read_to_end(&mut output),
    };
    result.map_err(|e| CapabilityError::InvalidData(format!("{}: {}", method.name(), e)))?;
    Ok(output)
}

#[derive(Debug, Clone)]
pub struct ObjectUrl {
    pub url: String,
    pub mime: String,
    pub data: Arc<[u8]>,
}

/// Object URLs minted for blob-backed image sources, keyed by the node
/// identifier that displays them. A node holds at most one.
#[derive(Debug)]
pub struct ObjectUrls {
    prefix: String,
    by_node: AHashMap<u32, ObjectUrl>,
}

impl ObjectUrls {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            by_node: AHashMap::new(),
        }
    }

    /// Mint a URL for `identifier`, revoking the one it held before
    pub fn create(&mut self, identifier: u32, mime: &str, data: Arc<[u8]>) -> String {
        let url = format!("{}{}", self.prefix, Uuid::new_v4());
        self.by_node.insert(
            identifier,
            ObjectUrl {
                url: url.clone(),
                mime: mime.to_string(),
                data,
            },
        );
        url
    }

    pub fn revoke(&mut self, identifier: u32) -> bool {
        self.by_node.remove(&identifier).is_some()
    }

    /// Revoke every URL held by the given identifiers
    pub fn release_nodes(&mut self, identifiers: &[u32]) -> usize {
        identifiers
            .iter()
            .filter(|id| self.by_node.remove(id).is_some())
            .count()
    }

    /// Look a live URL up by its string form
    pub fn resolve(&self, url: &str) -> Option<&ObjectUrl> {
        self.by_node.values().find(|object| object.url == url)
    }

    pub fn url_of(&self, identifier: u32) -> Option<&str> {
        self.by_node.get(&identifier).map(|object| object.url.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression as Level;
    use std::io::Write;

    #[test]
    fn test_handles_start_at_one_and_are_not_reused() {
        let mut table = HandleTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_eq!((a, b), (1, 2));

        table.remove(a);
        assert_eq!(table.insert("c"), 3);
        assert_eq!(table.get(a), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_reads_are_clamped() {
        let mut table = ResourceTable::new();
        let handle = table.insert(ByteResource::named("a.txt", b"hello".to_vec()));

        assert_eq!(table.size_of(handle), 5);
        assert_eq!(table.read(handle, 1, 3), b"ell");
        assert_eq!(table.read(handle, 3, 100), b"lo");
        assert_eq!(table.read(handle, 9, 4), b"");
        assert_eq!(table.read(99, 0, 4), b"");
        assert_eq!(table.size_of(99), 0);
    }

    #[test]
    fn test_decompress_all_methods() {
        let text = b"the quick brown fox jumps over the lazy dog".repeat(8);

        let mut gz = GzEncoder::new(Vec::new(), Level::default());
        gz.write_all(&text).unwrap();
        let gz = gz.finish().unwrap();

        let mut zlib = ZlibEncoder::new(Vec::new(), Level::default());
        zlib.write_all(&text).unwrap();
        let zlib = zlib.finish().unwrap();

        let mut raw = DeflateEncoder::new(Vec::new(), Level::default());
        raw.write_all(&text).unwrap();
        let raw = raw.finish().unwrap();

        assert_eq!(decompress(&gz, Compression::Gzip).unwrap(), text);
        assert_eq!(decompress(&zlib, Compression::Deflate).unwrap(), text);
        assert_eq!(decompress(&raw, Compression::DeflateRaw).unwrap(), text);
        assert!(decompress(b"not compressed", Compression::Gzip).is_err());
        assert_eq!(Compression::from_code(3), None);
    }

    #[test]
    fn test_object_urls_one_per_node() {
        let mut urls = ObjectUrls::new("blob:ward/");
        let first = urls.create(4, "image/png", Arc::from(&b"x"[..]));
        let second = urls.create(4, "image/png", Arc::from(&b"y"[..]));

        assert_ne!(first, second);
        assert!(second.starts_with("blob:ward/"));
        assert_eq!(urls.len(), 1);
        assert!(urls.resolve(&first).is_none());
        assert_eq!(urls.resolve(&second).unwrap().data.as_ref(), b"y");

        urls.create(5, "image/png", Arc::from(&b"z"[..]));
        assert_eq!(urls.release_nodes(&[4, 5, 6]), 2);
        assert!(urls.is_empty());
    }
}
