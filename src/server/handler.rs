//! Request handler
//!
//! The single pipeline both listeners feed. Every accepted query flows
//! through the same stages regardless of transport:
//!
//! ```text
//! bytes + client + transport
//!     |
//!     v
//! rate limiter ── exhausted ──► RateLimit (silent drop upstream)
//!     |
//!     v
//! request log (non-blocking; drops are counted, never fatal)
//!     |
//!     v
//! cache probe ── hit ──► synthesize fresh response ──► return
//!     |
//!     v
//! validate query ── invalid ──► Validation
//!     |
//!     v
//! synthesize ──► validate response ──► cache store ──► return
//! ```
//!
//! A cache hit skips the validation stage, not the synthesis: responses
//! embed the caller's transaction ID and echo its additional section, so
//! cached bytes belong to an earlier caller and are never replayed. The
//! cache answers "was this question seen recently", nothing more.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::cache::ResponseCache;
use crate::codec;
use crate::config::Config;
use crate::error::{SinkholeError, SinkholeResult};
use crate::limiter::RateLimiter;
use crate::logger::QueryLogger;
use crate::metrics::Metrics;
use crate::validator::MessageValidator;

use super::Transport;

/// The slice of configuration the handler needs
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    /// Address placed in every synthesized answer
    pub response_ip: std::net::Ipv4Addr,
    /// TTL placed in every synthesized answer
    pub response_ttl: u32,
    /// Lifetime for cache entries written on miss
    pub cache_ttl: Duration,
}

impl From<&Config> for HandlerConfig {
    fn from(config: &Config) -> Self {
        Self {
            response_ip: config.response_ip,
            response_ttl: config.response_ttl,
            cache_ttl: config.cache_ttl,
        }
    }
}

/// Orchestrates limiter, logger, cache, validator, and codec
pub struct RequestHandler {
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    validator: Arc<MessageValidator>,
    metrics: Arc<Metrics>,
    logger: Arc<QueryLogger>,
    config: HandlerConfig,
}

impl RequestHandler {
    /// Wire up a handler from shared components
    #[must_use]
    pub fn new(
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        validator: Arc<MessageValidator>,
        metrics: Arc<Metrics>,
        logger: Arc<QueryLogger>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            limiter,
            cache,
            validator,
            metrics,
            logger,
            config,
        }
    }

    /// Process one query and produce the response bytes
    ///
    /// Runs to completion without awaiting; the worker pool enforces the
    /// per-request deadline around it. The response-time sample is
    /// recorded on every path, including failures.
    ///
    /// # Errors
    ///
    /// - `RateLimit` when the client's bucket is empty
    /// - `Validation` when the query is structurally rejected
    /// - `Internal` when synthesis or response validation fails
    pub fn handle(
        &self,
        data: &[u8],
        client: SocketAddr,
        transport: Transport,
    ) -> SinkholeResult<Bytes> {
        let start = Instant::now();
        let result = self.handle_inner(data, client, transport);
        self.metrics.record_response_time(start.elapsed());
        result
    }

    fn handle_inner(
        &self,
        data: &[u8],
        client: SocketAddr,
        transport: Transport,
    ) -> SinkholeResult<Bytes> {
        if !self.limiter.allow(client) {
            self.metrics.record_rate_limited();
            trace!(client = %client, "query rate limited");
            return Err(SinkholeError::rate_limit(client));
        }
        self.metrics.record_rate_allowed();

        let client_str = client.to_string();
        if !self.logger.log_request(transport, &client_str, data) {
            self.metrics.record_dropped_log_record();
        }
        self.metrics.record_request();

        let fingerprint = codec::question_fingerprint(data);

        if let Some(fp) = fingerprint {
            if self.cache.get(fp).is_some() {
                self.metrics.record_cache_hit();
                self.logger.note(format!("Cache hit for {client_str}"));
                trace!(client = %client_str, "cache hit, skipping validation");

                // Fresh synthesis: the cached bytes carry another caller's
                // transaction ID and OPT cookie.
                return match codec::synthesize_response(
                    data,
                    self.config.response_ip,
                    self.config.response_ttl,
                ) {
                    Ok(response) => Ok(Bytes::from(response)),
                    Err(e) => {
                        self.metrics.record_error();
                        Err(SinkholeError::internal(format!(
                            "failed to synthesize response on cache hit: {e}"
                        )))
                    }
                };
            }
        }
        self.metrics.record_cache_miss();

        if let Err(e) = self.validator.validate_query(data) {
            self.metrics.record_invalid_query();
            self.logger
                .note(format!("Validation error for {client_str}: {e}"));
            debug!(client = %client_str, error = %e, "query rejected");
            return Err(e);
        }

        let response = match codec::synthesize_response(
            data,
            self.config.response_ip,
            self.config.response_ttl,
        ) {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_error();
                self.logger
                    .note(format!("Response creation error for {client_str}: {e}"));
                return Err(SinkholeError::internal(format!(
                    "failed to synthesize response: {e}"
                )));
            }
        };

        if let Err(e) = self.validator.validate_response(&response) {
            self.metrics.record_invalid_response();
            return Err(SinkholeError::internal(format!(
                "synthesized response failed validation: {e}"
            )));
        }

        let response = Bytes::from(response);
        self.logger.note(format!(
            "Created response for {client_str} ({} bytes)",
            response.len()
        ));

        if let Some(fp) = fingerprint {
            self.cache.set(fp, response.clone(), self.config.cache_ttl);
        }

        Ok(response)
    }

    /// Shared metrics handle
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    struct TestHarness {
        handler: RequestHandler,
        metrics: Arc<Metrics>,
        cache: Arc<ResponseCache>,
        _dir: tempfile::TempDir,
    }

    async fn harness(rate_limit: f64, burst: u32) -> TestHarness {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(
            QueryLogger::create(dir.path(), "test.log", false)
                .await
                .unwrap(),
        );
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(ResponseCache::new(
            1024 * 1024,
            Duration::from_secs(60),
        ));
        let handler = RequestHandler::new(
            Arc::new(RateLimiter::new(rate_limit, burst)),
            Arc::clone(&cache),
            Arc::new(MessageValidator::new()),
            Arc::clone(&metrics),
            logger,
            HandlerConfig::from(&Config::default()),
        );
        TestHarness {
            handler,
            metrics,
            cache,
            _dir: dir,
        }
    }

    fn query(id: u16, domain: &str) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&id.to_be_bytes());
        data.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        for label in domain.split('.') {
            data.push(u8::try_from(label.len()).unwrap());
            data.extend_from_slice(label.as_bytes());
        }
        data.push(0x00);
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        data
    }

    fn client() -> SocketAddr {
        "192.168.1.100:33000".parse().unwrap()
    }

    // ========================================================================
    // Happy Path Tests
    // ========================================================================

    #[tokio::test]
    async fn test_valid_query_gets_response() {
        let h = harness(1000.0, 100).await;
        let response = h
            .handler
            .handle(&query(0x1234, "example.com"), client(), Transport::Udp)
            .unwrap();

        assert_eq!(&response[0..2], &[0x12, 0x34]);
        assert_eq!(response[2] & 0x80, 0x80);
        assert_eq!(&response[6..8], &[0x00, 0x01]); // ANCOUNT = 1
        assert_eq!(h.metrics.total_requests(), 1);
        assert_eq!(h.metrics.cache_misses(), 1);
        assert_eq!(h.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_identical_questions_hit_cache_with_fresh_ids() {
        // Same question, different transaction IDs.
        let h = harness(1000.0, 100).await;

        let first = h
            .handler
            .handle(&query(0x1111, "example.com"), client(), Transport::Udp)
            .unwrap();
        let second = h
            .handler
            .handle(&query(0x2222, "example.com"), client(), Transport::Udp)
            .unwrap();

        assert_eq!(h.metrics.cache_misses(), 1);
        assert_eq!(h.metrics.cache_hits(), 1);

        // The two responses differ only in their transaction-id bytes.
        assert_eq!(&first[0..2], &[0x11, 0x11]);
        assert_eq!(&second[0..2], &[0x22, 0x22]);
        assert_eq!(&first[2..], &second[2..]);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_validation() {
        let h = harness(1000.0, 100).await;
        let q = query(0x0001, "example.com");

        let _ = h.handler.handle(&q, client(), Transport::Udp).unwrap();
        let validated_after_first = h.metrics.snapshot().invalid_queries;
        let _ = h.handler.handle(&q, client(), Transport::Udp).unwrap();

        // Hit path never touches the validator.
        assert_eq!(h.metrics.snapshot().invalid_queries, validated_after_first);
        assert_eq!(h.metrics.cache_hits(), 1);
    }

    // ========================================================================
    // Rate Limit Tests
    // ========================================================================

    #[tokio::test]
    async fn test_rate_limited_request_rejected() {
        let h = harness(1.0, 1).await;
        let q = query(0x0001, "example.com");

        assert!(h.handler.handle(&q, client(), Transport::Udp).is_ok());
        let err = h.handler.handle(&q, client(), Transport::Udp).unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(h.metrics.rate_limited(), 1);
        // The limited request was dropped before logging and counting.
        assert_eq!(h.metrics.total_requests(), 1);
    }

    // ========================================================================
    // Validation Tests
    // ========================================================================

    #[tokio::test]
    async fn test_malformed_query_rejected() {
        let h = harness(1000.0, 100).await;
        // Header claims one question but carries none (header-only frame).
        let mut bad = vec![0u8; 12];
        bad[5] = 0x01;

        let err = h.handler.handle(&bad, client(), Transport::Tcp).unwrap_err();
        assert!(err.is_invalid_message());
        assert_eq!(h.metrics.snapshot().invalid_queries, 1);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_short_query_rejected() {
        let h = harness(1000.0, 100).await;
        let err = h
            .handler
            .handle(&[0x00, 0x01, 0x02], client(), Transport::Udp)
            .unwrap_err();
        assert!(err.is_invalid_message());
    }

    #[tokio::test]
    async fn test_bad_opcode_rejected() {
        let h = harness(1000.0, 100).await;
        let mut q = query(0x0001, "example.com");
        q[2] |= 0x28; // opcode 5

        let err = h.handler.handle(&q, client(), Transport::Udp).unwrap_err();
        assert!(err.is_invalid_message());
    }

    // ========================================================================
    // Metrics Tests
    // ========================================================================

    #[tokio::test]
    async fn test_response_time_recorded_on_all_paths() {
        let h = harness(1.0, 1).await;
        let q = query(0x0001, "example.com");

        let _ = h.handler.handle(&q, client(), Transport::Udp); // ok
        let _ = h.handler.handle(&q, client(), Transport::Udp); // rate limited

        // Both outcomes leave a sample: only one request was counted, yet
        // the 60-second rate sees two samples.
        let snap = h.metrics.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.rate_limited, 1);
        assert!((snap.recent_request_rate - 2.0 / 60.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_opt_section_preserved_through_pipeline() {
        let h = harness(1000.0, 100).await;
        let mut q = query(0xCB17, "example.org");
        q[11] = 0x01; // ARCOUNT = 1
        let opt: &[u8] = &[0x00, 0x00, 0x29, 0x10, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00];
        q.extend_from_slice(opt);

        let response = h.handler.handle(&q, client(), Transport::Udp).unwrap();
        let opt_at = q.len() - opt.len();
        assert_eq!(&response[opt_at..q.len()], opt);
        assert!(response.len() > q.len());
    }
}
