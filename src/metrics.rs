//! Request metrics
//!
//! Lock-free counters for every boundary event in the pipeline plus a ring
//! of the most recent response-time samples. Counters are updated from any
//! worker with relaxed atomics; the sample ring takes a short lock on
//! append and sorts on demand when percentiles are requested.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Capacity of the response-time sample ring
pub const MAX_SAMPLES: usize = 1000;

/// Window for the "current rate" figure
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Process-wide request metrics
///
/// # Example
///
/// ```
/// use dns_sinkhole::metrics::Metrics;
/// use std::time::Duration;
///
/// let metrics = Metrics::new();
/// metrics.record_request();
/// metrics.record_cache_miss();
/// metrics.record_response_time(Duration::from_micros(150));
///
/// let snap = metrics.snapshot();
/// assert_eq!(snap.total_requests, 1);
/// assert_eq!(snap.cache_misses, 1);
/// ```
#[derive(Debug)]
pub struct Metrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    rate_allowed: AtomicU64,
    rate_limited: AtomicU64,
    invalid_queries: AtomicU64,
    invalid_responses: AtomicU64,
    dropped_queries: AtomicU64,
    dropped_log_records: AtomicU64,
    /// Unix seconds of the most recent request, 0 before the first
    last_request_unix: AtomicI64,
    samples: Mutex<VecDeque<(Instant, Duration)>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rate_allowed: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            invalid_queries: AtomicU64::new(0),
            invalid_responses: AtomicU64::new(0),
            dropped_queries: AtomicU64::new(0),
            dropped_log_records: AtomicU64::new(0),
            last_request_unix: AtomicI64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Count a request and stamp the last-request time
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.last_request_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Count a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a cache miss
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a request that passed the rate limiter
    pub fn record_rate_allowed(&self) {
        self.rate_allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rate-limited request
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected query
    pub fn record_invalid_query(&self) {
        self.invalid_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected response
    pub fn record_invalid_response(&self) {
        self.invalid_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a query dropped at the queue (overflow)
    pub fn record_dropped_query(&self) {
        self.dropped_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a log record dropped at the logger queue
    pub fn record_dropped_log_record(&self) {
        self.dropped_log_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Append a response-time sample, evicting the oldest past capacity
    pub fn record_response_time(&self, elapsed: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() >= MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back((Instant::now(), elapsed));
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Get total request count
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get cache hit count
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Get cache miss count
    #[must_use]
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Get error count
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Get rate-allowed count
    #[must_use]
    pub fn rate_allowed(&self) -> u64 {
        self.rate_allowed.load(Ordering::Relaxed)
    }

    /// Get rate-limited count
    #[must_use]
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Get dropped-query count
    #[must_use]
    pub fn dropped_queries(&self) -> u64 {
        self.dropped_queries.load(Ordering::Relaxed)
    }

    /// Snapshot of counters and derived response-time figures
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg, min, max, p95, p99, recent_rate) = self.response_time_figures();
        MetricsSnapshot {
            total_requests: self.total_requests(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            errors: self.errors(),
            rate_allowed: self.rate_allowed(),
            rate_limited: self.rate_limited(),
            invalid_queries: self.invalid_queries.load(Ordering::Relaxed),
            invalid_responses: self.invalid_responses.load(Ordering::Relaxed),
            dropped_queries: self.dropped_queries(),
            dropped_log_records: self.dropped_log_records.load(Ordering::Relaxed),
            last_request: self.last_request(),
            avg_response_time: avg,
            min_response_time: min,
            max_response_time: max,
            p95_response_time: p95,
            p99_response_time: p99,
            recent_request_rate: recent_rate,
        }
    }

    /// The reduced counter view served by the health endpoint
    #[must_use]
    pub fn health_view(&self) -> MetricsView {
        MetricsView {
            total_requests: self.total_requests(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            errors: self.errors(),
            last_request: self
                .last_request()
                .map_or_else(|| "never".to_string(), |t| {
                    t.to_rfc3339_opts(SecondsFormat::Secs, true)
                }),
        }
    }

    fn last_request(&self) -> Option<DateTime<Utc>> {
        let unix = self.last_request_unix.load(Ordering::Relaxed);
        if unix == 0 {
            None
        } else {
            DateTime::from_timestamp(unix, 0)
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn response_time_figures(
        &self,
    ) -> (Duration, Duration, Duration, Duration, Duration, f64) {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return (
                Duration::ZERO,
                Duration::ZERO,
                Duration::ZERO,
                Duration::ZERO,
                Duration::ZERO,
                0.0,
            );
        }

        let mut sorted: Vec<Duration> = samples.iter().map(|&(_, d)| d).collect();
        sorted.sort_unstable();

        let total: Duration = sorted.iter().sum();
        let avg = total / u32::try_from(sorted.len()).unwrap_or(1);
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let p95 = sorted[(sorted.len() * 95) / 100].min(max);
        let p99 = sorted[(sorted.len() * 99) / 100].min(max);

        let now = Instant::now();
        let recent = samples
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= RATE_WINDOW)
            .count();
        let rate = recent as f64 / RATE_WINDOW.as_secs_f64();

        (avg, min, max, p95, p99, rate)
    }
}

/// Full metrics snapshot for the stats renderer
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    /// Total requests
    pub total_requests: u64,
    /// Cache hits
    pub cache_hits: u64,
    /// Cache misses
    pub cache_misses: u64,
    /// Errors
    pub errors: u64,
    /// Requests past the limiter
    pub rate_allowed: u64,
    /// Requests refused by the limiter
    pub rate_limited: u64,
    /// Rejected queries
    pub invalid_queries: u64,
    /// Rejected responses
    pub invalid_responses: u64,
    /// Queue-overflow drops
    pub dropped_queries: u64,
    /// Logger-queue drops
    pub dropped_log_records: u64,
    /// Most recent request time
    pub last_request: Option<DateTime<Utc>>,
    /// Mean of the sampled response times
    pub avg_response_time: Duration,
    /// Fastest sample
    pub min_response_time: Duration,
    /// Slowest sample
    pub max_response_time: Duration,
    /// 95th percentile
    pub p95_response_time: Duration,
    /// 99th percentile
    pub p99_response_time: Duration,
    /// Samples in the last 60 s, per second
    pub recent_request_rate: f64,
}

/// Counter view serialized into the `/metrics` response body
#[derive(Debug, Clone, Serialize)]
pub struct MetricsView {
    /// Total requests
    pub total_requests: u64,
    /// Cache hits
    pub cache_hits: u64,
    /// Cache misses
    pub cache_misses: u64,
    /// Errors
    pub errors: u64,
    /// RFC 3339 time of the most recent request, or `"never"`
    pub last_request: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Counter Tests
    // ========================================================================

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = Metrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.errors, 0);
        assert!(snap.last_request.is_none());
    }

    #[test]
    fn test_record_request_updates_last_request() {
        let metrics = Metrics::new();
        metrics.record_request();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 1);
        let last = snap.last_request.expect("last_request set");
        assert!((Utc::now() - last).num_seconds().abs() < 5);
    }

    #[test]
    fn test_each_counter_records() {
        let metrics = Metrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_error();
        metrics.record_rate_allowed();
        metrics.record_rate_limited();
        metrics.record_invalid_query();
        metrics.record_invalid_response();
        metrics.record_dropped_query();
        metrics.record_dropped_log_record();

        let snap = metrics.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.rate_allowed, 1);
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.invalid_queries, 1);
        assert_eq!(snap.invalid_responses, 1);
        assert_eq!(snap.dropped_queries, 1);
        assert_eq!(snap.dropped_log_records, 1);
    }

    // ========================================================================
    // Response-Time Ring Tests
    // ========================================================================

    #[test]
    fn test_percentiles_over_known_distribution() {
        let metrics = Metrics::new();
        for ms in 1..=100u64 {
            metrics.record_response_time(Duration::from_millis(ms));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.min_response_time, Duration::from_millis(1));
        assert_eq!(snap.max_response_time, Duration::from_millis(100));
        // Index 95 of the sorted 100 samples is the 96 ms value.
        assert_eq!(snap.p95_response_time, Duration::from_millis(96));
        assert_eq!(snap.p99_response_time, Duration::from_millis(100));
        assert_eq!(snap.avg_response_time, Duration::from_micros(50_500));
    }

    #[test]
    fn test_ring_capacity_bounded() {
        let metrics = Metrics::new();
        for _ in 0..(MAX_SAMPLES + 500) {
            metrics.record_response_time(Duration::from_micros(10));
        }
        assert_eq!(metrics.samples.lock().len(), MAX_SAMPLES);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let metrics = Metrics::new();
        metrics.record_response_time(Duration::from_secs(9));
        for _ in 0..MAX_SAMPLES {
            metrics.record_response_time(Duration::from_millis(1));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.max_response_time, Duration::from_millis(1));
    }

    #[test]
    fn test_recent_rate_counts_fresh_samples() {
        let metrics = Metrics::new();
        for _ in 0..60 {
            metrics.record_response_time(Duration::from_micros(5));
        }
        let snap = metrics.snapshot();
        assert!((snap.recent_request_rate - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_ring_figures_are_zero() {
        let metrics = Metrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.avg_response_time, Duration::ZERO);
        assert_eq!(snap.p95_response_time, Duration::ZERO);
        assert!(snap.recent_request_rate.abs() < f64::EPSILON);
    }

    // ========================================================================
    // Health View Tests
    // ========================================================================

    #[test]
    fn test_health_view_before_any_request() {
        let metrics = Metrics::new();
        let view = metrics.health_view();
        assert_eq!(view.total_requests, 0);
        assert_eq!(view.last_request, "never");
    }

    #[test]
    fn test_health_view_serializes_expected_fields() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_cache_hit();

        let json = serde_json::to_value(metrics.health_view()).unwrap();
        assert_eq!(json["total_requests"], 1);
        assert_eq!(json["cache_hits"], 1);
        assert_eq!(json["cache_misses"], 0);
        assert_eq!(json["errors"], 0);
        let last = json["last_request"].as_str().unwrap();
        assert!(
            DateTime::parse_from_rfc3339(last).is_ok(),
            "last_request {last:?} is not RFC 3339"
        );
    }

    // ========================================================================
    // Concurrency Tests
    // ========================================================================

    #[test]
    fn test_concurrent_recording() {
        use std::sync::Arc;

        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_request();
                        metrics.record_response_time(Duration::from_micros(3));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.total_requests(), 8000);
        assert_eq!(metrics.samples.lock().len(), MAX_SAMPLES);
    }
}
