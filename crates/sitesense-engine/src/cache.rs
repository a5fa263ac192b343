//! Result cache.
//!
//! Key→value store shared by every query kind, holding fully-shaped
//! response payloads as JSON. Entries carry their own TTL; expiry is
//! checked lazily on read, so no background eviction task exists. Capacity
//! is bounded with LRU eviction.
//!
//! The cache is best-effort by contract: the facade treats every
//! [`CacheError`] as a miss and logs it, so a broken cache backend slows
//! queries down but never fails them.

use crate::canonical::CacheKey;
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sitesense_observability::metrics;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

/// A cached result with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,

    /// Wall-clock insertion time, ms since epoch.
    pub cached_at_ms: i64,

    /// TTL the entry was stored with, seconds.
    pub ttl_secs: u64,
}

/// Shared key→value store with per-entry TTL and explicit invalidation.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Look up a live entry. Expired entries count as misses.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store a value. Replaces any existing entry for the key.
    async fn put(
        &self,
        key: CacheKey,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Drop every entry.
    async fn clear(&self) -> Result<(), CacheError>;
}

struct StoredEntry {
    value: serde_json::Value,
    inserted: Instant,
    cached_at_ms: i64,
    ttl: Duration,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.inserted.elapsed() > self.ttl
    }
}

/// In-memory LRU result cache.
pub struct MemoryResultCache {
    entries: Mutex<LruCache<String, StoredEntry>>,
}

impl MemoryResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Live (unexpired) entry count and capacity.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            entries: entries.iter().filter(|(_, e)| !e.is_expired()).count(),
            capacity: entries.cap().get(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.entries.lock().await;

        // Lazy expiry: drop a stale entry on the read that finds it.
        if entries.get(key.as_str()).is_some_and(|e| e.is_expired()) {
            entries.pop(key.as_str());
            metrics::CACHE_ENTRIES.set(entries.len() as i64);
            tracing::debug!(cache_key = %key, "Cache entry expired");
        }

        match entries.get(key.as_str()) {
            Some(entry) => {
                metrics::CACHE_HITS_TOTAL.inc();
                tracing::debug!(cache_key = %key, "Cache hit");
                Ok(Some(CacheEntry {
                    value: entry.value.clone(),
                    cached_at_ms: entry.cached_at_ms,
                    ttl_secs: entry.ttl.as_secs(),
                }))
            }
            None => {
                metrics::CACHE_MISSES_TOTAL.inc();
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        key: CacheKey,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.put(
            key.as_str().to_string(),
            StoredEntry {
                value,
                inserted: Instant::now(),
                cached_at_ms: now_ms(),
                ttl,
            },
        );
        metrics::CACHE_ENTRIES.set(entries.len() as i64);
        tracing::debug!(cache_key = %key, ttl_secs = ttl.as_secs(), "Cached result");
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.pop(key.as_str());
        metrics::CACHE_ENTRIES.set(entries.len() as i64);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        metrics::CACHE_ENTRIES.set(0);
        tracing::debug!("Result cache cleared");
        Ok(())
    }
}
