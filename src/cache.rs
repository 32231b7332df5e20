//! Response cache keyed by question fingerprint
//!
//! The cache remembers which question sections have been seen and the
//! response bytes synthesized for them. Entries expire after a TTL, reads
//! refresh recency, and the total byte footprint is bounded: inserts that
//! push the cache past its budget evict least-recently-used entries until
//! it fits again.
//!
//! # Architecture
//!
//! ```text
//! fingerprint ──► get() ──┬── fresh entry ──► touch recency, hit
//! (question bytes)        └── missing/expired ──► miss (expired removed)
//!
//! set() ──► insert ──► footprint > max_bytes? ──► evict LRU until it fits
//!
//! cleanup() ──► drop every expired entry        (interval ticker + on demand)
//! ```
//!
//! A hit means "this question was seen recently", not "replay these bytes
//! to the client": responses carry client-specific header bytes, so the
//! handler re-synthesizes on hit and uses the cache only to skip
//! validation work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

/// Cache statistics
///
/// All counters are atomic; read them individually or as a
/// [`CacheStatsSnapshot`].
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups that found a fresh entry
    hits: AtomicU64,
    /// Lookups that found nothing usable
    misses: AtomicU64,
    /// Entries inserted or replaced
    insertions: AtomicU64,
    /// Entries evicted under byte pressure
    evictions: AtomicU64,
    /// Expired entries removed (sweep or lazy removal on read)
    expirations: AtomicU64,
}

impl CacheStats {
    /// Get hit count
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get insertion count
    #[must_use]
    pub fn insertions(&self) -> u64 {
        self.insertions.load(Ordering::Relaxed)
    }

    /// Get eviction count
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get expiration count
    #[must_use]
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Hit ratio in [0, 1]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Snapshot of cache state and counters
#[derive(Debug, Clone, Copy)]
pub struct CacheStatsSnapshot {
    /// Live entry count
    pub size: usize,
    /// Total bytes held by live entries
    pub bytes_in_memory: u64,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Insertion count
    pub insertions: u64,
    /// Eviction count
    pub evictions: u64,
    /// Expiration count
    pub expirations: u64,
}

impl CacheStatsSnapshot {
    /// Hit ratio in [0, 1]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    response: Bytes,
    expires_at: Instant,
    size: u64,
    /// Milliseconds since the cache was created, updated on every read
    last_access: AtomicU64,
}

impl CacheEntry {
    fn touch(&self, epoch: Instant) {
        let tick = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_access.store(tick, Ordering::Relaxed);
    }

    fn last_access_tick(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Size-bounded, TTL-expiring response cache
///
/// # Example
///
/// ```
/// use dns_sinkhole::cache::ResponseCache;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let cache = ResponseCache::new(1024, Duration::from_secs(60));
/// cache.set(b"question-bytes", Bytes::from_static(b"response"), Duration::ZERO);
/// assert!(cache.get(b"question-bytes").is_some());
/// assert_eq!(cache.stats().hits(), 1);
/// ```
pub struct ResponseCache {
    entries: DashMap<Bytes, CacheEntry>,
    max_bytes: u64,
    default_ttl: Duration,
    bytes_in_memory: AtomicU64,
    epoch: Instant,
    stats: CacheStats,
}

impl ResponseCache {
    /// Create a cache with a byte budget and default entry TTL
    #[must_use]
    pub fn new(max_bytes: u64, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_bytes,
            default_ttl,
            bytes_in_memory: AtomicU64::new(0),
            epoch: Instant::now(),
            stats: CacheStats::default(),
        }
    }

    /// Look up a fingerprint
    ///
    /// Returns the stored response when the entry exists and has not
    /// expired; refreshes the entry's recency. An expired entry is removed
    /// and counts as a miss.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                entry.touch(self.epoch);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.response.clone());
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Entry existed but expired; remove it outside the read guard.
        if let Some((_, entry)) = self.entries.remove_if(key, |_, e| e.expires_at <= now) {
            self.bytes_in_memory.fetch_sub(entry.size, Ordering::Relaxed);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace an entry
    ///
    /// A zero `ttl` means "use the cache default". When the byte footprint
    /// exceeds the budget after insertion, least-recently-used entries are
    /// evicted until it fits.
    pub fn set(&self, key: &[u8], response: Bytes, ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let size = response.len() as u64;

        let entry = CacheEntry {
            response,
            expires_at: Instant::now() + ttl,
            size,
            last_access: AtomicU64::new(0),
        };
        entry.touch(self.epoch);

        let replaced = self.entries.insert(Bytes::copy_from_slice(key), entry);
        self.bytes_in_memory.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = replaced {
            self.bytes_in_memory.fetch_sub(old.size, Ordering::Relaxed);
        }
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);

        if self.bytes_in_memory.load(Ordering::Relaxed) > self.max_bytes {
            // Expired entries go first; only then sacrifice live ones.
            self.cleanup();
            while self.bytes_in_memory.load(Ordering::Relaxed) > self.max_bytes {
                if !self.evict_lru() {
                    break;
                }
            }
        }
    }

    /// Remove every expired entry
    ///
    /// Runs on the cleanup ticker and on demand. Returns the number of
    /// entries removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Bytes> = self
            .entries
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| e.expires_at <= now) {
                self.bytes_in_memory.fetch_sub(entry.size, Ordering::Relaxed);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes currently held
    #[must_use]
    pub fn bytes_in_memory(&self) -> u64 {
        self.bytes_in_memory.load(Ordering::Relaxed)
    }

    /// Cache counters
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Snapshot of state and counters
    #[must_use]
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            size: self.len(),
            bytes_in_memory: self.bytes_in_memory(),
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            insertions: self.stats.insertions(),
            evictions: self.stats.evictions(),
            expirations: self.stats.expirations(),
        }
    }

    /// Evict the least-recently-used entry
    ///
    /// Linear scan over the map for the oldest access tick. Returns false
    /// when there was nothing to evict.
    fn evict_lru(&self) -> bool {
        let mut oldest_key: Option<Bytes> = None;
        let mut oldest_tick = u64::MAX;

        for entry in self.entries.iter() {
            let tick = entry.value().last_access_tick();
            if tick <= oldest_tick {
                oldest_tick = tick;
                oldest_key = Some(entry.key().clone());
            }
        }

        let Some(key) = oldest_key else {
            return false;
        };
        if let Some((_, entry)) = self.entries.remove(&key) {
            self.bytes_in_memory.fetch_sub(entry.size, Ordering::Relaxed);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(idle_tick = oldest_tick, "evicted least-recently-used cache entry");
            true
        } else {
            false
        }
    }
}
