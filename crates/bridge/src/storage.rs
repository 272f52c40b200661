//! Synchronous local storage with a byte quota

use ahash::AHashMap;
use tracing::warn;

#[derive(Debug)]
pub struct LocalStorage {
    entries: AHashMap<String, String>,
    quota: usize,
    used: usize,
}

impl LocalStorage {
    pub fn new(quota: usize) -> Self {
        Self {
            entries: AHashMap::new(),
            quota,
            used: 0,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Store a value. Returns false, changing nothing, when the write
    /// would exceed the quota.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let freed = self
            .entries
            .get(key)
            .map_or(0, |old| key.len() + old.len());
        let needed = key.len() + value.len();
        let used = self.used - freed + needed;
        if used > self.quota {
            warn!(key, needed, quota = self.quota, "local storage quota exceeded");
            return false;
        }
        self.entries.insert(key.to_string(), value.to_string());
        self.used = used;
        true
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.remove(key) {
            self.used -= key.len() + old.len();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_accounting() {
        let mut storage = LocalStorage::new(10);
        assert!(storage.set("ab", "cdef"));
        assert_eq!(storage.used_bytes(), 6);

        // Overwrite frees the old value first
        assert!(storage.set("ab", "12345678"));
        assert_eq!(storage.used_bytes(), 10);
        assert!(!storage.set("x", "y"));
        assert_eq!(storage.get("ab"), Some("12345678"));

        storage.remove("ab");
        assert_eq!(storage.used_bytes(), 0);
        assert!(storage.set("x", "y"));
        storage.clear();
        assert!(storage.is_empty());
        assert_eq!(storage.get("x"), None);
    }
}
