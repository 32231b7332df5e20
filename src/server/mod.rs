//! Sinkhole server
//!
//! Wires every component together and owns the process lifecycle.
//!
//! # Startup order
//!
//! ```text
//! validate config → open request log → build cache/limiter/validator/metrics
//!     → start worker pool → bind UDP + TCP → start health server
//!     → start background tickers (cache sweep, limiter sweep, stats render)
//! ```
//!
//! # Shutdown order
//!
//! Listeners stop accepting first, then the queue closes and workers drain
//! in-flight requests (bounded by the per-request deadline), then the
//! request log flushes and closes, and finally the health server stops.
//!
//! # Components
//!
//! - [`handler`]: the request pipeline
//! - [`worker`]: bounded queue + worker bank + reply targets
//! - [`udp`] / [`tcp`]: the two transports
//!
//! # Example
//!
//! ```no_run
//! use dns_sinkhole::config::Config;
//! use dns_sinkhole::server::Sinkhole;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sinkhole = Sinkhole::start(Config::default()).await?;
//! // ... block on a signal ...
//! sinkhole.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod tcp;
pub mod udp;
pub mod worker;

pub use handler::{HandlerConfig, RequestHandler};
pub use tcp::TcpDnsListener;
pub use udp::UdpListener;
pub use worker::{ReplyTarget, Request, WorkerPool};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::SinkholeResult;
use crate::health::HealthServer;
use crate::limiter::RateLimiter;
use crate::logger::QueryLogger;
use crate::metrics::Metrics;
use crate::validator::MessageValidator;

/// Interval of the runtime statistics renderer
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// How long shutdown waits for each background task
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(8);

/// Transport a query arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Datagram transport
    Udp,
    /// Stream transport with 2-byte length framing
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => f.write_str("UDP"),
            Self::Tcp => f.write_str("TCP"),
        }
    }
}

/// Running sinkhole instance
///
/// Constructed by [`Sinkhole::start`]; torn down by [`Sinkhole::shutdown`].
pub struct Sinkhole {
    metrics: Arc<Metrics>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    validator: Arc<MessageValidator>,
    logger: Arc<QueryLogger>,
    pool: Arc<WorkerPool>,
    health: HealthServer,
    udp_addr: SocketAddr,
    tcp_addr: SocketAddr,
    shutdown_txs: Vec<oneshot::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl Sinkhole {
    /// Validate the configuration and bring every component up
    ///
    /// # Errors
    ///
    /// Returns configuration errors from validation and network errors
    /// from socket binds; nothing keeps running when this fails.
    pub async fn start(config: Config) -> SinkholeResult<Self> {
        config.validate()?;

        let logger =
            Arc::new(QueryLogger::create(&config.logs_dir, &config.log_file, config.debug).await?);
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(ResponseCache::new(config.cache_max_bytes, config.cache_ttl));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_burst));
        let validator = Arc::new(MessageValidator::new());

        let request_handler = Arc::new(RequestHandler::new(
            Arc::clone(&limiter),
            Arc::clone(&cache),
            Arc::clone(&validator),
            Arc::clone(&metrics),
            Arc::clone(&logger),
            HandlerConfig::from(&config),
        ));
        let pool = Arc::new(WorkerPool::start(
            config.worker_count,
            request_handler,
            Arc::clone(&metrics),
        ));

        // UDP binds first; TCP reuses whatever port it got so both
        // transports share a port even when starting from port 0.
        let udp = UdpListener::bind(
            SocketAddr::from(([0, 0, 0, 0], config.port)),
            Arc::clone(&pool),
        )
        .await?;
        let udp_addr = udp.local_addr();
        let tcp = TcpDnsListener::bind(
            SocketAddr::from(([0, 0, 0, 0], udp_addr.port())),
            Arc::clone(&pool),
        )
        .await?;
        let tcp_addr = tcp.local_addr();

        let health = HealthServer::bind(config.health_port, Arc::clone(&metrics)).await?;

        print_startup_summary(&config, udp_addr.port(), pool.queue_capacity());

        let mut shutdown_txs = Vec::new();
        let mut handles = Vec::new();

        let (tx, rx) = oneshot::channel();
        handles.push(tokio::spawn(udp.run_until_shutdown(rx)));
        shutdown_txs.push(tx);

        let (tx, rx) = oneshot::channel();
        handles.push(tokio::spawn(tcp.run_until_shutdown(rx)));
        shutdown_txs.push(tx);

        // Cache sweep ticker.
        let (tx, mut rx) = oneshot::channel();
        let sweep_cache = Arc::clone(&cache);
        let sweep_interval = config.cache_cleanup_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => { sweep_cache.cleanup(); }
                    _ = &mut rx => break,
                }
            }
        }));
        shutdown_txs.push(tx);

        // Limiter idle sweep ticker.
        let (tx, mut rx) = oneshot::channel();
        let sweep_limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_limiter.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => { sweep_limiter.sweep(); }
                    _ = &mut rx => break,
                }
            }
        }));
        shutdown_txs.push(tx);

        // Runtime statistics renderer.
        let (tx, mut rx) = oneshot::channel();
        let stats_metrics = Arc::clone(&metrics);
        let stats_cache = Arc::clone(&cache);
        let stats_limiter = Arc::clone(&limiter);
        let stats_validator = Arc::clone(&validator);
        let stats_pool = Arc::clone(&pool);
        let started_at = Instant::now();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        println!(
                            "{}",
                            render_runtime_stats(
                                started_at.elapsed(),
                                &stats_metrics,
                                &stats_cache,
                                &stats_limiter,
                                &stats_validator,
                                &stats_pool,
                            )
                        );
                    }
                    _ = &mut rx => break,
                }
            }
        }));
        shutdown_txs.push(tx);

        info!(
            dns = %udp_addr,
            health = %health.local_addr(),
            "sinkhole started"
        );

        Ok(Self {
            metrics,
            cache,
            limiter,
            validator,
            logger,
            pool,
            health,
            udp_addr,
            tcp_addr,
            shutdown_txs,
            handles,
            started_at,
        })
    }

    /// Bound DNS address (UDP and TCP share the port)
    #[must_use]
    pub fn dns_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Bound TCP address
    #[must_use]
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Bound health server address
    #[must_use]
    pub fn health_addr(&self) -> SocketAddr {
        self.health.local_addr()
    }

    /// Shared metrics handle
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Shared cache handle
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Shared limiter handle
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Shared validator handle
    #[must_use]
    pub fn validator(&self) -> &Arc<MessageValidator> {
        &self.validator
    }

    /// Time since startup
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Ordered teardown
    ///
    /// Stops the listeners and tickers, drains the worker pool, flushes
    /// and closes the request log, then stops the health server.
    pub async fn shutdown(mut self) {
        info!("sinkhole shutting down");

        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(());
        }
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("background task did not stop in time");
            }
        }

        self.pool.shutdown().await;

        self.logger.note("DNS sinkhole stopped");
        self.logger.shutdown().await;

        self.health.shutdown().await;
        info!("sinkhole stopped");
    }
}

/// The configuration block printed once at startup
fn print_startup_summary(config: &Config, port: u16, queue_capacity: usize) {
    println!(
        "\n=== DNS Sinkhole Configuration ===\n\
         > Port: {port}\n\
         > Worker Pool Size: {} workers\n\
         > Request Queue Capacity: {queue_capacity} requests\n\
         > Rate Limit: {:.0} requests/second (burst: {})\n\
         > Cache TTL: {}\n\
         > Cache Cleanup Interval: {}\n\
         > Response Address: {} (TTL {}s)\n\
         > Log Directory: {}\n\
         ==================================",
        config.worker_count,
        config.rate_limit,
        config.rate_burst,
        fmt_duration(config.cache_ttl),
        fmt_duration(config.cache_cleanup_interval),
        config.response_ip,
        config.response_ttl,
        config.logs_dir.display(),
    );
}

/// The 30-second runtime snapshot written to stdout
fn render_runtime_stats(
    uptime: Duration,
    metrics: &Metrics,
    cache: &ResponseCache,
    limiter: &RateLimiter,
    validator: &MessageValidator,
    pool: &WorkerPool,
) -> String {
    let m = metrics.snapshot();
    let c = cache.snapshot();
    let l = limiter.snapshot();
    let v = validator.stats().snapshot();
    let p = pool.stats().snapshot();

    let queue_depth = pool.queue_depth();
    let queue_capacity = pool.queue_capacity();
    #[allow(clippy::cast_precision_loss)]
    let queue_utilization = if queue_capacity == 0 {
        0.0
    } else {
        queue_depth as f64 / queue_capacity as f64 * 100.0
    };
    #[allow(clippy::cast_precision_loss)]
    let avg_rate = if uptime.as_secs_f64() > 0.0 {
        m.total_requests as f64 / uptime.as_secs_f64()
    } else {
        0.0
    };
    let validated_ok = v
        .total_validated
        .saturating_sub(v.invalid_queries + v.invalid_responses);
    #[allow(clippy::cast_precision_loss)]
    let validation_rate = if v.total_validated == 0 {
        100.0
    } else {
        validated_ok as f64 / v.total_validated as f64 * 100.0
    };

    format!(
        "\n=== Runtime Statistics ===\n\
         > Uptime: {}\n\
         > Cache:\n\
         \x20 - Size: {} entries ({})\n\
         \x20 - Hit Ratio: {:.1}% ({}/{})\n\
         \x20 - Evictions: {} (expired: {})\n\
         > Processing:\n\
         \x20 - Queue Load: {queue_depth}/{queue_capacity} ({queue_utilization:.0}% utilized)\n\
         \x20 - Total Requests: {} ({avg_rate:.1}/sec avg, {:.1}/sec current)\n\
         \x20 - Dropped at Queue: {}\n\
         \x20 - Retries: {} / Timeouts: {}\n\
         > Response Times:\n\
         \x20 - Avg: {}\n\
         \x20 - P95: {}\n\
         \x20 - P99: {}\n\
         > Rate Limiting:\n\
         \x20 - Limited Requests: {}\n\
         \x20 - Active Clients: {}\n\
         \x20 - Burst Usage: {:.1}%\n\
         > Validation:\n\
         \x20 - Success Rate: {validation_rate:.1}% ({validated_ok}/{})\n\
         \x20 - Invalid Queries: {}\n\
         \x20 - Invalid Responses: {}\n\
         ==========================",
        fmt_duration(uptime),
        c.size,
        humanize_bytes(c.bytes_in_memory),
        c.hit_ratio() * 100.0,
        c.hits,
        c.hits + c.misses,
        c.evictions,
        c.expirations,
        m.total_requests,
        m.recent_request_rate,
        m.dropped_queries,
        p.retries,
        p.timeouts,
        fmt_duration(m.avg_response_time),
        fmt_duration(m.p95_response_time),
        fmt_duration(m.p99_response_time),
        l.limited,
        l.active_clients,
        l.burst_usage * 100.0,
        v.total_validated,
        v.invalid_queries,
        v.invalid_responses,
    )
}

/// Human-readable duration: sub-millisecond in µs, sub-second in ms
fn fmt_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0".to_string();
    }
    if d < Duration::from_millis(1) {
        return format!("{:.2}µs", d.as_secs_f64() * 1_000_000.0);
    }
    if d < Duration::from_secs(1) {
        return format!("{:.2}ms", d.as_secs_f64() * 1_000.0);
    }
    if d < Duration::from_secs(90) {
        return format!("{:.2}s", d.as_secs_f64());
    }
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else {
        format!("{minutes}m{seconds}s")
    }
}

/// Human-readable byte count with binary units
fn humanize_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < 5 {
        value /= 1024.0;
        unit += 1;
    }
    let suffix = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"][unit];
    format!("{value:.1} {suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Formatting Tests
    // ========================================================================

    #[test]
    fn test_transport_display() {
        assert_eq!(Transport::Udp.to_string(), "UDP");
        assert_eq!(Transport::Tcp.to_string(), "TCP");
    }

    #[test]
    fn test_fmt_duration_ranges() {
        assert_eq!(fmt_duration(Duration::ZERO), "0");
        assert_eq!(fmt_duration(Duration::from_micros(250)), "250.00µs");
        assert_eq!(fmt_duration(Duration::from_millis(12)), "12.00ms");
        assert_eq!(fmt_duration(Duration::from_secs(3)), "3.00s");
        assert_eq!(fmt_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(fmt_duration(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_humanize_bytes() {
        assert_eq!(humanize_bytes(512), "512 B");
        assert_eq!(humanize_bytes(2048), "2.0 KiB");
        assert_eq!(humanize_bytes(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(humanize_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    // ========================================================================
    // Stats Rendering Tests
    // ========================================================================

    #[tokio::test]
    async fn test_render_runtime_stats_sections() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(
            QueryLogger::create(dir.path(), "stats.log", false)
                .await
                .unwrap(),
        );
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(ResponseCache::new(1024, Duration::from_secs(60)));
        let limiter = Arc::new(RateLimiter::new(100.0, 10));
        let validator = Arc::new(MessageValidator::new());
        let handler = Arc::new(RequestHandler::new(
            Arc::clone(&limiter),
            Arc::clone(&cache),
            Arc::clone(&validator),
            Arc::clone(&metrics),
            logger,
            HandlerConfig::from(&Config::default()),
        ));
        let pool = WorkerPool::start(1, handler, Arc::clone(&metrics));

        metrics.record_request();
        let rendered = render_runtime_stats(
            Duration::from_secs(90),
            &metrics,
            &cache,
            &limiter,
            &validator,
            &pool,
        );

        assert!(rendered.contains("Runtime Statistics"));
        assert!(rendered.contains("Uptime: 1m30s"));
        assert!(rendered.contains("Total Requests: 1"));
        assert!(rendered.contains("Queue Load: 0/20"));
        assert!(rendered.contains("Validation"));

        pool.shutdown().await;
    }
}
