//! Content-addressed image cache.
//!
//! Maps a [`crate::fingerprint::cache_key`] to a previously rasterised
//! [`RasterImage`]. The cache is shared by every render session in the process
//! (and, with [`DiskStore`], across processes), which is what makes reopening a
//! document near-instant: every diagram it contains is already a cache hit.
//!
//! ## Layers
//!
//! * [`CacheStore`]: the storage collaborator. Every call may fail with a
//!   [`CacheError`]. Two implementations ship: [`MemoryStore`] and
//!   [`DiskStore`]. Both evict strictly least-recently-used entries to stay
//!   within their item capacity.
//! * [`ImageCache`]: the facade the adapters use. It serialises all access
//!   behind one mutex and never fails: a storage error is logged and treated
//!   as a miss (for `get`) or as "not cached" (for `put`). The renderer always
//!   tolerates a cold cache.

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::error::CacheError;
use crate::kind::ContentKind;
use crate::raster::RasterImage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default item capacity.
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// One cached rasterisation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub kind: ContentKind,
    pub payload: RasterImage,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Fresh entry stamped with the current time.
    pub fn new(key: impl Into<String>, payload: RasterImage, kind: ContentKind) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            kind,
            size_bytes: payload.size_bytes(),
            payload,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Metadata-only view for diagnostics.
    pub fn summary(&self) -> CacheItemSummary {
        CacheItemSummary {
            key: self.key.clone(),
            kind: self.kind,
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

/// Per-entry line in [`CacheStats::items`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItemSummary {
    pub key: String,
    pub kind: ContentKind,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Snapshot of cache occupancy, most recently used first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub item_count: usize,
    pub total_size_bytes: u64,
    pub max_items: usize,
    pub items: Vec<CacheItemSummary>,
}

/// Storage collaborator behind [`ImageCache`].
///
/// Implementations enforce their own capacity: after `set` returns, the store
/// holds at most `max_items` entries, the least recently used having been
/// evicted. `get` counts as a use.
pub trait CacheStore: Send {
    /// Look up `key`, refreshing its recency on a hit.
    fn get(&mut self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or overwrite `key`.
    fn set(&mut self, key: &str, payload: RasterImage, kind: ContentKind)
        -> Result<(), CacheError>;

    /// Drop every entry.
    fn clear(&mut self) -> Result<(), CacheError>;

    /// Occupancy snapshot.
    fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Process-wide, infallible cache facade.
///
/// Construct one and share it (`Arc<ImageCache>`) between every adapter and
/// session; there is no module-level singleton.
pub struct ImageCache {
    store: Mutex<Box<dyn CacheStore>>,
}

impl ImageCache {
    /// Wrap an arbitrary store.
    pub fn new(store: impl CacheStore + 'static) -> Self {
        Self {
            store: Mutex::new(Box::new(store)),
        }
    }

    /// In-memory LRU cache holding at most `max_items` entries.
    pub fn in_memory(max_items: usize) -> Self {
        Self::new(MemoryStore::new(max_items))
    }

    /// Look up a payload. Storage failures read as a miss.
    pub fn get(&self, key: &str) -> Option<RasterImage> {
        match self.store.lock().get(key) {
            Ok(Some(entry)) => {
                debug!("Cache hit: {}", key);
                Some(entry.payload)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Store a payload. Returns `false` when the store refused it.
    pub fn put(&self, key: &str, payload: RasterImage, kind: ContentKind) -> bool {
        match self.store.lock().set(key, payload, kind) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache write failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Remove all entries. Returns `false` when the store failed.
    pub fn clear(&self) -> bool {
        match self.store.lock().clear() {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache clear failed: {}", e);
                false
            }
        }
    }

    /// Occupancy snapshot; an empty one if the store cannot report.
    pub fn stats(&self) -> CacheStats {
        self.store.lock().stats().unwrap_or_else(|e| {
            warn!("Cache stats unavailable: {}", e);
            CacheStats::default()
        })
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::in_memory(DEFAULT_MAX_ITEMS)
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    pub(crate) fn payload(tag: u8) -> RasterImage {
        RasterImage {
            bytes: vec![tag; 16],
            width: 40,
            height: 20,
            mime: "image/png".into(),
        }
    }

    /// A store whose every call fails.
    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn get(&mut self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Err(broken())
        }
        fn set(&mut self, _: &str, _: RasterImage, _: ContentKind) -> Result<(), CacheError> {
            Err(broken())
        }
        fn clear(&mut self) -> Result<(), CacheError> {
            Err(broken())
        }
        fn stats(&self) -> Result<CacheStats, CacheError> {
            Err(broken())
        }
    }

    fn broken() -> CacheError {
        CacheError::Io {
            path: PathBuf::from("/nowhere"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
        }
    }

    #[test]
    fn put_then_get_returns_payload() {
        let cache = ImageCache::in_memory(4);
        assert!(cache.put("k", payload(1), ContentKind::Diagram));
        assert_eq!(cache.get("k"), Some(payload(1)));
    }

    #[test]
    fn second_put_is_idempotent() {
        let cache = ImageCache::in_memory(4);
        cache.put("k", payload(1), ContentKind::Diagram);
        cache.put("k", payload(1), ContentKind::Diagram);
        assert_eq!(cache.get("k"), Some(payload(1)));
        assert_eq!(cache.stats().item_count, 1);
    }

    #[test]
    fn broken_store_degrades_to_cold_cache() {
        let cache = ImageCache::new(BrokenStore);
        assert_eq!(cache.get("k"), None);
        assert!(!cache.put("k", payload(1), ContentKind::Diagram));
        assert!(!cache.clear());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn clear_empties_cache() {
        let cache = ImageCache::in_memory(4);
        cache.put("a", payload(1), ContentKind::Diagram);
        cache.put("b", payload(2), ContentKind::HtmlBlock);
        assert!(cache.clear());
        assert_eq!(cache.stats().item_count, 0);
        assert_eq!(cache.get("a"), None);
    }
}
