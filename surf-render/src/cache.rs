//! Advisory key-value cache
//!
//! The render pipeline and the fragment cache share one store. Every operation
//! reports a [`CacheResult`]: a store that is down is a miss, never a failed
//! request.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default maximum number of entries in [`MemoryStore`]
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Outcome of a cache operation
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResult<T> {
    Ready(T),
    /// The store could not serve the operation
    Unavailable(String),
}

impl<T> CacheResult<T> {
    /// The value, logging and discarding an unavailable store
    pub fn advisory(self, op: &str, key: &str) -> Option<T> {
        match self {
            CacheResult::Ready(v) => Some(v),
            CacheResult::Unavailable(reason) => {
                log::warn!("cache {} for {} skipped: {}", op, key, reason);
                None
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CacheResult::Ready(_))
    }
}

/// String store with per-entry TTL
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
}

/// Lowercase hex SHA-256 of `input`
pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Key of a cached stylesheet or image, `res:{kind}:{sha256(url)}`
pub fn resource_key(kind: &str, url: &str) -> String {
    format!("res:{}:{}", kind, sha256_hex(url))
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Memory store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of expired entries removed
    pub expired: u64,
    pub entries: usize,
}

struct Inner {
    entries: LruCache<String, Entry>,
    stats: StoreStats,
}

/// In-process [`KvStore`] with LRU eviction
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries)
            .or_else(|| NonZeroUsize::new(DEFAULT_MAX_ENTRIES))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                stats: StoreStats::default(),
            }),
        }
    }

    pub async fn stats(&self) -> StoreStats {
        self.inner.lock().await.stats.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.stats.entries = 0;
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.pop(key);
        }
        inner.stats.expired += expired.len() as u64;
        inner.stats.entries = inner.entries.len();
        expired.len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        let hit = match inner.entries.peek(key).map(Entry::is_expired) {
            Some(true) => {
                inner.entries.pop(key);
                inner.stats.expired += 1;
                None
            }
            Some(false) => inner.entries.get(key).map(|entry| entry.value.clone()),
            None => None,
        };

        match hit {
            Some(_) => inner.stats.hits += 1,
            None => inner.stats.misses += 1,
        }
        inner.stats.entries = inner.entries.len();
        CacheResult::Ready(hit)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        if ttl.is_zero() {
            return CacheResult::Ready(());
        }
        let mut inner = self.inner.lock().await;
        inner.entries.put(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        inner.stats.entries = inner.entries.len();
        CacheResult::Ready(())
    }
}
