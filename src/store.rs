//! Cache store boundary and the in-memory implementation.
//!
//! The gateway talks only to the [`CacheStore`] trait; hosts with a shared
//! backend (redis, memcached) implement it themselves. [`MemoryStore`] is
//! the first-party implementation: LRU-bounded entries plus a tag index for
//! bulk invalidation, with lazy expiry on read.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::PageCacheConfig;
use crate::error::StoreError;
use crate::keys::PageKey;
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "varco::store";

/// How long a cache entry remains valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Expires after the given duration.
    For(Duration),
    /// Never expires; removed only by invalidation or eviction.
    Never,
    /// Do not cache: a put with this lifetime is a no-op.
    Bypass,
}

impl Lifetime {
    /// Zero seconds maps to [`Lifetime::Never`], matching the configuration
    /// convention.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::Never
        } else {
            Self::For(Duration::from_secs(secs))
        }
    }
}

/// One stored page. Never mutated in place; a put replaces the entry whole.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub body: Bytes,
    pub tags: Vec<String>,
    expires_at: Option<OffsetDateTime>,
}

impl CacheEntry {
    /// Returns `None` for a [`Lifetime::Bypass`] put.
    fn build(body: Bytes, tags: Vec<String>, lifetime: Lifetime) -> Option<Self> {
        let expires_at = match lifetime {
            Lifetime::Bypass => return None,
            Lifetime::Never => None,
            Lifetime::For(duration) => {
                let duration =
                    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX);
                Some(OffsetDateTime::now_utc() + duration)
            }
        };
        Some(Self {
            body,
            tags,
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => OffsetDateTime::now_utc() > expires_at,
            None => false,
        }
    }
}

/// Key/value store with tag-based bulk invalidation and per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read an entry body. Expired entries read as absent.
    async fn get(&self, key: &PageKey) -> Result<Option<Bytes>, StoreError>;

    /// Write an entry, replacing any prior entry for the key.
    async fn put(
        &self,
        key: &PageKey,
        body: Bytes,
        tags: &[String],
        lifetime: Lifetime,
    ) -> Result<(), StoreError>;

    /// Drop every entry carrying the tag; returns how many were removed.
    async fn invalidate_tag(&self, tag: &str) -> Result<u64, StoreError>;

    /// Cheap hit-test without transferring the body.
    async fn exists_valid(&self, key: &PageKey) -> Result<bool, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory page store with LRU eviction and a tag index.
pub struct MemoryStore {
    entries: RwLock<LruCache<PageKey, CacheEntry>>,
    tag_index: RwLock<HashMap<String, HashSet<PageKey>>>,
}

impl MemoryStore {
    /// Create a store sized by the given configuration.
    pub fn new(config: &PageCacheConfig) -> Self {
        Self::with_capacity(config.max_entries_non_zero())
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            tag_index: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of live entries.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a key from every tag set the entry was indexed under.
    fn untag(&self, key: &PageKey, entry: &CacheEntry) {
        let mut index = rw_write(&self.tag_index, SOURCE, "untag");
        for tag in &entry.tags {
            if let Some(keys) = index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(tag);
                }
            }
        }
    }

    fn remove_entry(&self, key: &PageKey) -> Option<CacheEntry> {
        let removed = rw_write(&self.entries, SOURCE, "remove_entry").pop(key);
        if let Some(entry) = &removed {
            self.untag(key, entry);
        }
        removed
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &PageKey) -> Result<Option<Bytes>, StoreError> {
        let found = rw_write(&self.entries, SOURCE, "get").get(key).cloned();
        match found {
            Some(entry) if entry.is_expired() => {
                self.remove_entry(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.body)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &PageKey,
        body: Bytes,
        tags: &[String],
        lifetime: Lifetime,
    ) -> Result<(), StoreError> {
        let Some(entry) = CacheEntry::build(body, tags.to_vec(), lifetime) else {
            debug!(key = %key, "bypass lifetime; entry not stored");
            return Ok(());
        };

        let displaced = rw_write(&self.entries, SOURCE, "put").push(key.clone(), entry);
        // `push` hands back either the replaced entry for this key or the
        // LRU-evicted one; both leave stale tag index rows behind.
        if let Some((displaced_key, displaced_entry)) = displaced {
            self.untag(&displaced_key, &displaced_entry);
        }

        let mut index = rw_write(&self.tag_index, SOURCE, "put.tag_index");
        for tag in tags {
            index.entry(tag.clone()).or_default().insert(key.clone());
        }
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, StoreError> {
        let keys = rw_write(&self.tag_index, SOURCE, "invalidate_tag").remove(tag);
        let Some(keys) = keys else { return Ok(0) };

        let mut removed = 0u64;
        for key in keys {
            let entry = rw_write(&self.entries, SOURCE, "invalidate_tag.pop").pop(&key);
            if let Some(entry) = entry {
                self.untag(&key, &entry);
                removed += 1;
            }
        }
        debug!(tag, removed, "tag invalidated");
        Ok(removed)
    }

    async fn exists_valid(&self, key: &PageKey) -> Result<bool, StoreError> {
        let valid = rw_read(&self.entries, SOURCE, "exists_valid")
            .peek(key)
            .is_some_and(|entry| !entry.is_expired());
        Ok(valid)
    }
}
