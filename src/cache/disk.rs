//! Persistent LRU store: rendered images survive process restarts.
//!
//! Layout inside the cache directory:
//!
//! ```text
//! index.json          entry metadata, least recently used first
//! <sha256(key)>.bin   raw image bytes, one file per entry
//! ```
//!
//! The index is rewritten atomically (temp file + rename) after every
//! mutation, and after reads when the store is flushed or dropped. A missing or
//! unreadable index opens as an empty cache; orphaned payload files are
//! harmless and get overwritten on the next insert of the same key.

use super::{CacheEntry, CacheStats, CacheStore};
use crate::error::CacheError;
use crate::fingerprint::fingerprint;
use crate::kind::ContentKind;
use crate::raster::RasterImage;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    kind: ContentKind,
    width: u32,
    height: u32,
    mime: String,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    size_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskIndex {
    version: u32,
    entries: Vec<EntryMeta>,
}

/// Directory-backed store with the same eviction policy as
/// [`super::MemoryStore`].
pub struct DiskStore {
    dir: PathBuf,
    index: LruCache<String, EntryMeta>,
    total_size: u64,
    dirty: bool,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, max_items: usize) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let cap = NonZeroUsize::new(max_items.max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut store = Self {
            dir,
            index: LruCache::new(cap),
            total_size: 0,
            dirty: false,
        };

        let entries = store.load_index();
        let loaded = entries.len();
        for meta in entries {
            store.insert_meta(meta);
        }
        info!(
            "Opened disk cache at {} ({} entries, {} bytes)",
            store.dir.display(),
            store.index.len(),
            store.total_size
        );
        if store.index.len() < loaded {
            // Capacity shrank since the index was written.
            store.write_index()?;
        }
        Ok(store)
    }

    /// Directory this store lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist pending recency updates.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if self.dirty {
            self.write_index()?;
        }
        Ok(())
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", fingerprint(key)))
    }

    fn load_index(&self) -> Vec<EntryMeta> {
        let path = self.index_path();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Cannot read cache index {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_slice::<DiskIndex>(&raw) {
            Ok(index) if index.version == INDEX_VERSION => index.entries,
            Ok(index) => {
                warn!(
                    "Ignoring cache index version {} (expected {})",
                    index.version, INDEX_VERSION
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Corrupt cache index {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Push metadata as most recently used, deleting whatever it displaces.
    fn insert_meta(&mut self, meta: EntryMeta) {
        let key = meta.key.clone();
        self.total_size += meta.size_bytes;
        if let Some((old_key, old)) = self.index.push(key.clone(), meta) {
            self.total_size = self.total_size.saturating_sub(old.size_bytes);
            if old_key != key {
                debug!("Evicted least-recently-used cache entry {}", old_key);
                self.remove_payload(&old_key);
            }
        }
    }

    fn remove_payload(&self, key: &str) {
        let path = self.payload_path(key);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Cannot remove cache payload {}: {}", path.display(), e);
            }
        }
    }

    fn forget(&mut self, key: &str) {
        if let Some(meta) = self.index.pop(key) {
            self.total_size = self.total_size.saturating_sub(meta.size_bytes);
            self.dirty = true;
        }
    }

    fn write_index(&mut self) -> Result<(), CacheError> {
        let index = DiskIndex {
            version: INDEX_VERSION,
            entries: self.index.iter().rev().map(|(_, m)| m.clone()).collect(),
        };
        let json = serde_json::to_vec_pretty(&index)?;
        let path = self.index_path();
        write_atomic(&self.dir, &path, &json)?;
        self.dirty = false;
        Ok(())
    }
}

impl CacheStore for DiskStore {
    fn get(&mut self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.payload_path(key);
        let Some(meta) = self.index.get(key).cloned() else {
            return Ok(None);
        };

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Cache payload for {} vanished; dropping entry", key);
                self.forget(key);
                return Ok(None);
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        if bytes.len() as u64 != meta.size_bytes {
            self.forget(key);
            self.remove_payload(key);
            return Err(CacheError::Corrupt {
                key: key.to_string(),
                detail: format!(
                    "payload is {} bytes, index says {}",
                    bytes.len(),
                    meta.size_bytes
                ),
            });
        }

        let now = Utc::now();
        if let Some(m) = self.index.get_mut(key) {
            m.last_accessed_at = now;
        }
        self.dirty = true;

        Ok(Some(CacheEntry {
            key: meta.key,
            kind: meta.kind,
            payload: RasterImage {
                bytes,
                width: meta.width,
                height: meta.height,
                mime: meta.mime,
            },
            created_at: meta.created_at,
            last_accessed_at: now,
            size_bytes: meta.size_bytes,
        }))
    }

    fn set(
        &mut self,
        key: &str,
        payload: RasterImage,
        kind: ContentKind,
    ) -> Result<(), CacheError> {
        let path = self.payload_path(key);
        write_atomic(&self.dir, &path, &payload.bytes)?;

        let now = Utc::now();
        let created_at = self.index.peek(key).map(|m| m.created_at).unwrap_or(now);
        self.insert_meta(EntryMeta {
            key: key.to_string(),
            kind,
            width: payload.width,
            height: payload.height,
            mime: payload.mime,
            created_at,
            last_accessed_at: now,
            size_bytes: payload.bytes.len() as u64,
        });
        self.write_index()
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        let keys: Vec<String> = self.index.iter().map(|(k, _)| k.clone()).collect();
        for key in &keys {
            self.remove_payload(key);
        }
        self.index.clear();
        self.total_size = 0;
        self.write_index()
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            item_count: self.index.len(),
            total_size_bytes: self.total_size,
            max_items: self.index.cap().get(),
            items: self
                .index
                .iter()
                .map(|(_, m)| super::CacheItemSummary {
                    key: m.key.clone(),
                    kind: m.kind,
                    size_bytes: m.size_bytes,
                    created_at: m.created_at,
                    last_accessed_at: m.last_accessed_at,
                })
                .collect(),
        })
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush cache index: {}", e);
        }
    }
}

/// Write `data` to `path` via a temp file in `dir` and an atomic rename.
fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(data).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
