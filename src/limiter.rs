//! Per-client token-bucket rate limiting
//!
//! Each client address owns a token bucket holding up to `burst` tokens,
//! refilled continuously at `rate` tokens per second. A request spends one
//! token; an empty bucket means the request is dropped. Buckets for idle
//! clients are swept periodically to bound memory.
//!
//! # Architecture
//!
//! ```text
//! allow(client)
//!     |
//!     v
//! DashMap<SocketAddr, Mutex<TokenBucket>>
//!     |       refill by elapsed × rate, cap at burst
//!     v
//! tokens ≥ 1 ? spend and allow : limited
//! ```
//!
//! Buckets are keyed by the full `SocketAddr` (IP and port), matching a
//! deployment where distinct resolver processes on one host are limited
//! independently.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Default sweep interval for idle buckets
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Rate limiter statistics
#[derive(Debug, Default)]
pub struct RateLimiterStats {
    /// Requests that received a token
    allowed: AtomicU64,
    /// Requests refused for lack of tokens
    limited: AtomicU64,
    /// Idle buckets removed by the sweep
    evicted: AtomicU64,
}

impl RateLimiterStats {
    /// Get allowed count
    #[must_use]
    pub fn allowed(&self) -> u64 {
        self.allowed.load(Ordering::Relaxed)
    }

    /// Get limited count
    #[must_use]
    pub fn limited(&self) -> u64 {
        self.limited.load(Ordering::Relaxed)
    }

    /// Get evicted-bucket count
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

/// Snapshot of limiter state and counters
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterStatsSnapshot {
    /// Requests that received a token
    pub allowed: u64,
    /// Requests refused
    pub limited: u64,
    /// Live buckets
    pub active_clients: usize,
    /// Idle buckets removed so far
    pub evicted: u64,
    /// `1 − mean(tokens/burst)` across live buckets; 0 when idle
    pub burst_usage: f64,
}

struct TokenBucket {
    tokens: f64,
    last_check: Instant,
}

/// Per-client token-bucket rate limiter
///
/// # Example
///
/// ```
/// use dns_sinkhole::limiter::RateLimiter;
///
/// let limiter = RateLimiter::new(1.0, 1);
/// let client = "10.0.0.1:40000".parse().unwrap();
///
/// assert!(limiter.allow(client));   // spends the only token
/// assert!(!limiter.allow(client));  // bucket empty
/// ```
pub struct RateLimiter {
    buckets: DashMap<SocketAddr, Mutex<TokenBucket>>,
    rate: f64,
    burst: u32,
    sweep_interval: Duration,
    stats: RateLimiterStats,
}

impl RateLimiter {
    /// Create a limiter with the default idle-sweep interval
    #[must_use]
    pub fn new(rate: f64, burst: u32) -> Self {
        Self::with_sweep_interval(rate, burst, DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a limiter with an explicit idle-sweep interval
    #[must_use]
    pub fn with_sweep_interval(rate: f64, burst: u32, sweep_interval: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            rate,
            burst,
            sweep_interval,
            stats: RateLimiterStats::default(),
        }
    }

    /// Decide whether a request from `client` may proceed
    ///
    /// A new client starts with a full bucket. The counters are updated
    /// inside the bucket's critical section so concurrent calls for the
    /// same client cannot lose updates.
    pub fn allow(&self, client: SocketAddr) -> bool {
        let now = Instant::now();
        let entry = self.buckets.entry(client).or_insert_with(|| {
            Mutex::new(TokenBucket {
                tokens: f64::from(self.burst),
                last_check: now,
            })
        });

        let mut bucket = entry.lock();
        let elapsed = now.saturating_duration_since(bucket.last_check);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(f64::from(self.burst));
        bucket.last_check = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            self.stats.allowed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.stats.limited.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Drop buckets idle longer than the sweep interval
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let cutoff = self.sweep_interval;
        let before = self.buckets.len();

        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.lock().last_check) <= cutoff);

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            self.stats.evicted.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "rate limiter sweep dropped idle buckets");
        }
        removed
    }

    /// Number of live buckets
    #[must_use]
    pub fn active_clients(&self) -> usize {
        self.buckets.len()
    }

    /// Configured refill rate in tokens/second
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Configured bucket capacity
    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Configured idle-sweep interval
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Limiter counters
    #[must_use]
    pub fn stats(&self) -> &RateLimiterStats {
        &self.stats
    }

    /// Fraction of burst capacity in use, averaged over live buckets
    ///
    /// `1.0` means every bucket is empty, `0.0` means every bucket is full
    /// (or there are no buckets).
    #[must_use]
    pub fn burst_usage(&self) -> f64 {
        let mut total_tokens = 0.0;
        let mut count = 0usize;
        for entry in self.buckets.iter() {
            total_tokens += entry.value().lock().tokens;
            count += 1;
        }
        if count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let capacity = count as f64 * f64::from(self.burst);
        1.0 - (total_tokens / capacity)
    }

    /// Snapshot of state and counters
    #[must_use]
    pub fn snapshot(&self) -> RateLimiterStatsSnapshot {
        RateLimiterStatsSnapshot {
            allowed: self.stats.allowed(),
            limited: self.stats.limited(),
            active_clients: self.active_clients(),
            evicted: self.stats.evicted(),
            burst_usage: self.burst_usage(),
        }
    }
}
