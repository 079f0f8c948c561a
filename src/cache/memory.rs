//! In-memory LRU store.

use super::{CacheEntry, CacheStats, CacheStore};
use crate::error::CacheError;
use crate::kind::ContentKind;
use crate::raster::RasterImage;
use chrono::Utc;
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

/// Item-bounded LRU store living for the lifetime of the process.
pub struct MemoryStore {
    entries: LruCache<String, CacheEntry>,
    total_size: u64,
}

impl MemoryStore {
    /// Store holding at most `max_items` entries (minimum 1).
    pub fn new(max_items: usize) -> Self {
        let cap = NonZeroUsize::new(max_items.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            total_size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of payload sizes currently held.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

impl CacheStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = Utc::now();
            entry.clone()
        }))
    }

    fn set(
        &mut self,
        key: &str,
        payload: RasterImage,
        kind: ContentKind,
    ) -> Result<(), CacheError> {
        let mut entry = CacheEntry::new(key, payload, kind);
        if let Some(existing) = self.entries.peek(key) {
            entry.created_at = existing.created_at;
        }
        self.total_size += entry.size_bytes;
        // `push` hands back either the overwritten value or the evicted LRU entry.
        if let Some((old_key, old)) = self.entries.push(key.to_string(), entry) {
            self.total_size = self.total_size.saturating_sub(old.size_bytes);
            if old_key != key {
                debug!("Evicted least-recently-used cache entry {}", old_key);
            }
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        self.total_size = 0;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            item_count: self.entries.len(),
            total_size_bytes: self.total_size,
            max_items: self.entries.cap().get(),
            items: self.entries.iter().map(|(_, e)| e.summary()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::payload;

    #[test]
    fn capacity_is_never_exceeded() {
        let mut store = MemoryStore::new(3);
        for i in 0..5u8 {
            store
                .set(&format!("k{i}"), payload(i), ContentKind::Diagram)
                .unwrap();
        }
        assert_eq!(store.len(), 3);
        // The two oldest are gone.
        assert!(store.get("k0").unwrap().is_none());
        assert!(store.get("k1").unwrap().is_none());
        assert!(store.get("k4").unwrap().is_some());
    }

    #[test]
    fn access_refreshes_recency() {
        let mut store = MemoryStore::new(2);
        store.set("a", payload(1), ContentKind::Diagram).unwrap();
        store.set("b", payload(2), ContentKind::Diagram).unwrap();
        // Touch "a" so "b" becomes least recently used.
        assert!(store.get("a").unwrap().is_some());
        store.set("c", payload(3), ContentKind::Diagram).unwrap();
        assert!(store.get("a").unwrap().is_some());
        assert!(store.get("b").unwrap().is_none());
    }

    #[test]
    fn total_size_tracks_inserts_overwrites_and_evictions() {
        let mut store = MemoryStore::new(2);
        store.set("a", payload(1), ContentKind::Diagram).unwrap();
        assert_eq!(store.total_size(), 16);
        store.set("a", payload(1), ContentKind::Diagram).unwrap();
        assert_eq!(store.total_size(), 16);
        store.set("b", payload(2), ContentKind::Diagram).unwrap();
        store.set("c", payload(3), ContentKind::Diagram).unwrap();
        assert_eq!(store.total_size(), 32);
        store.clear().unwrap();
        assert_eq!(store.total_size(), 0);
    }

    #[test]
    fn stats_lists_most_recent_first() {
        let mut store = MemoryStore::new(10);
        store.set("old", payload(1), ContentKind::Diagram).unwrap();
        store.set("new", payload(2), ContentKind::VectorImage).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.item_count, 2);
        assert_eq!(stats.max_items, 10);
        assert_eq!(stats.items[0].key, "new");
        assert_eq!(stats.items[1].key, "old");
    }

    #[test]
    fn overwrite_keeps_creation_time() {
        let mut store = MemoryStore::new(4);
        store.set("a", payload(1), ContentKind::Diagram).unwrap();
        let first = store.get("a").unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        store.set("a", payload(2), ContentKind::Diagram).unwrap();
        let second = store.get("a").unwrap().unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert!(second.last_accessed_at > first.created_at);
        assert_eq!(store.len(), 1);
    }
}
