//! Client page cache
//!
//! Holds decoded pages keyed by normalized URL. Eviction is by insertion
//! order, not by use: reads never refresh an entry.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use surf_protocol::PagePayload;
use url::Url;

/// Default maximum number of cached pages
pub const DEFAULT_PAGE_CACHE_SIZE: usize = 50;

/// Default page lifetime
pub const DEFAULT_PAGE_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedPage {
    payload: Arc<PagePayload>,
    inserted_at: Instant,
}

/// Page cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because they outlived the TTL
    pub expired: u64,
    /// Entries dropped to make room
    pub evicted: u64,
}

/// Bounded, TTL-limited cache of decoded pages
pub struct PageCache {
    entries: LruCache<String, CachedPage>,
    ttl: Duration,
    stats: PageCacheStats,
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_CACHE_SIZE, DEFAULT_PAGE_CACHE_TTL)
    }
}

impl PageCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_entries)
            .or_else(|| NonZeroUsize::new(DEFAULT_PAGE_CACHE_SIZE))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            ttl,
            stats: PageCacheStats::default(),
        }
    }

    pub fn get(&mut self, url: &str) -> Option<Arc<PagePayload>> {
        self.get_at(url, Instant::now())
    }

    /// Look up `url` as of `now`, removing it if it has expired
    pub fn get_at(&mut self, url: &str, now: Instant) -> Option<Arc<PagePayload>> {
        let key = normalize_url(url);

        let expired = match self.entries.peek(&key) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(page) => now.saturating_duration_since(page.inserted_at) > self.ttl,
        };

        if expired {
            self.entries.pop(&key);
            self.stats.expired += 1;
            self.stats.misses += 1;
            log::debug!("page cache entry for {} expired", key);
            return None;
        }

        self.stats.hits += 1;
        self.entries.peek(&key).map(|page| page.payload.clone())
    }

    pub fn set(&mut self, url: &str, payload: Arc<PagePayload>) {
        self.set_at(url, payload, Instant::now())
    }

    /// Insert `payload` as of `now`
    ///
    /// Replacing an existing entry counts as a fresh insertion.
    pub fn set_at(&mut self, url: &str, payload: Arc<PagePayload>, now: Instant) {
        let key = normalize_url(url);

        // pop first so a replaced key moves to the newest position
        self.entries.pop(&key);
        let page = CachedPage {
            payload,
            inserted_at: now,
        };
        if let Some((evicted, _)) = self.entries.push(key, page) {
            self.stats.evicted += 1;
            log::debug!("page cache full, evicted {}", evicted);
        }
    }

    pub fn remove(&mut self, url: &str) -> bool {
        self.entries.pop(&normalize_url(url)).is_some()
    }

    /// Whether `url` has an entry, expired or not
    pub fn has(&self, url: &str) -> bool {
        self.entries.contains(&normalize_url(url))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &PageCacheStats {
        &self.stats
    }
}

/// Canonical form of `url`, or the raw string when it does not parse
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    }
}
