use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::models::{MediaItem, Phase, ServiceName};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct FallbackCacheEntry {
    pub data: Vec<MediaItem>,
    pub timestamp: DateTime<Utc>,
    expires_at: Instant,
}

impl FallbackCacheEntry {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub fn service_key(service: ServiceName) -> String {
    format!("service:{}", service)
}

pub fn phase_key(phase: Phase) -> String {
    format!("phase:{}", phase)
}

/// Last good results, consulted only when a live fetch fails
#[derive(Debug)]
pub struct FallbackCache {
    ttl: Duration,
    entries: RwLock<LruCache<String, FallbackCacheEntry>>,
}

impl FallbackCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub async fn put(&self, key: impl Into<String>, data: Vec<MediaItem>) {
        let key = key.into();
        trace!("Fallback cache: storing {} items under {}", data.len(), key);
        self.entries.write().await.put(
            key,
            FallbackCacheEntry {
                data,
                timestamp: Utc::now(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Fresh entry for `key`; expired entries are evicted on read
    pub async fn get(&self, key: &str) -> Option<FallbackCacheEntry> {
        let mut entries = self.entries.write().await;
        let expired = entries.peek(key).map(|e| e.is_expired())?;
        if expired {
            debug!("Fallback cache entry {} expired", key);
            entries.pop(key);
            return None;
        }
        entries.get(key).cloned()
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.pop(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
