use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use clipdeck_core::{CacheConfig, Fingerprint};
use lru::LruCache;
use serde::Serialize;
use tracing::debug;

/// Cache counters for pipeline metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub max_entries: usize,
    pub max_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Results larger than the whole byte budget, never stored.
    pub oversized: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    entries: LruCache<Fingerprint, Bytes>,
    bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    oversized: u64,
}

/// LRU map from payload fingerprint to processed bytes, bounded by entry
/// count and total size. Priority plays no part in eviction.
pub struct ResultCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: u64,
}

impl ResultCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                oversized: 0,
            }),
            max_entries: capacity.get(),
            max_bytes,
        }
    }

    /// `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_entries, config.max_bytes))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a processed result, marking it most recently used.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        let mut inner = self.lock();
        match inner.entries.get(fingerprint).cloned() {
            Some(hit) => {
                inner.hits += 1;
                Some(hit)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a result, evicting least recently used entries until both
    /// bounds hold again.
    pub fn put(&self, fingerprint: Fingerprint, value: Bytes) {
        let size = value.len() as u64;
        let mut inner = self.lock();
        if size > self.max_bytes {
            inner.oversized += 1;
            debug!(fingerprint = %fingerprint.short(), size, "result larger than cache budget, not cached");
            return;
        }

        inner.bytes += size;
        if let Some((old_key, old_value)) = inner.entries.push(fingerprint, value) {
            inner.bytes -= old_value.len() as u64;
            if old_key != fingerprint {
                inner.evictions += 1;
            }
        }
        while inner.bytes > self.max_bytes {
            let Some((_, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.bytes -= evicted.len() as u64;
            inner.evictions += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            oversized: inner.oversized,
        }
    }
}
