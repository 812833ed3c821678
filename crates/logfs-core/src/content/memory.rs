//! In-process content backend.

use crate::content::ContentBackend;
use crate::error::{ContentError, ContentResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::trace;

/// In-memory content store.
///
/// Thread-safe via an internal `RwLock`. All data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ContentBackend for MemoryBackend {
    fn put(&self, path: &str, content: &[u8]) -> ContentResult<()> {
        trace!(path, len = content.len(), "memory put");
        self.blobs.write().insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn get(&self, path: &str) -> ContentResult<Vec<u8>> {
        self.blobs
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ContentError::NotFound {
                path: path.to_string(),
            })
    }

    fn list_by_prefix(&self, prefix: &str) -> ContentResult<Vec<String>> {
        // BTreeMap keys are ordered, so every match sits in one contiguous run
        let blobs = self.blobs.read();
        let paths = blobs
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        Ok(paths)
    }

    fn delete(&self, path: &str) -> ContentResult<()> {
        trace!(path, "memory delete");
        self.blobs.write().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_get() {
        let store = MemoryBackend::new();
        store.put("a/b", &[1, 2, 3]).unwrap();
        assert_eq!(store.get("a/b").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_put_replaces() {
        let store = MemoryBackend::new();
        store.put("f", b"first").unwrap();
        store.put("f", b"2nd").unwrap();
        assert_eq!(store.get("f").unwrap(), b"2nd");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = MemoryBackend::new();
        let err = store.get("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_empty_blob_is_distinct_from_missing() {
        let store = MemoryBackend::new();
        store.put("empty", b"").unwrap();
        assert_eq!(store.get("empty").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_list_by_prefix() {
        let store = MemoryBackend::new();
        for path in ["a/b", "a/c", "ab", "b/a", "a/d/e"] {
            store.put(path, b"x").unwrap();
        }
        assert_eq!(store.list_by_prefix("a/").unwrap(), vec!["a/b", "a/c", "a/d/e"]);
        assert_eq!(store.list_by_prefix("a").unwrap(), vec!["a/b", "a/c", "a/d/e", "ab"]);
        assert!(store.list_by_prefix("zzz").unwrap().is_empty());
        assert_eq!(store.list_by_prefix("").unwrap().len(), 5);
    }

    #[test]
    fn test_delete() {
        let store = MemoryBackend::new();
        store.put("a/b", &[1, 2, 3]).unwrap();
        store.delete("a/b").unwrap();
        assert!(store.get("a/b").unwrap_err().is_not_found());
        // Deleting again is fine
        store.delete("a/b").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_puts() {
        let store = Arc::new(MemoryBackend::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for j in 0..100 {
                        store.put(&format!("t{i}/{j}"), &[i, j]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 800);
        assert_eq!(store.list_by_prefix("t3/").unwrap().len(), 100);
    }
}
