//! dns-sinkhole: a dual-transport DNS sinkhole
//!
//! Accepts every well-formed DNS query on one port (UDP and TCP), logs it,
//! and answers with a fixed synthetic A record pointing at a configured
//! address. Built for passive observation of DNS traffic at high request
//! rates on constrained hardware.
//!
//! # Architecture
//!
//! ```text
//! UDP socket ──┐                                        ┌─► rate limiter
//!              ├─► bounded queue ─► worker pool ─► handler ─► request log
//! TCP socket ──┘                                        ├─► cache
//!                                                       └─► codec (validate
//!                                                            + synthesize)
//! response written back on the originating transport;
//! metrics at every boundary; HTTP /health + /metrics on a side port
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use dns_sinkhole::config::Config;
//! use dns_sinkhole::server::Sinkhole;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let sinkhole = Sinkhole::start(config).await?;
//! tokio::signal::ctrl_c().await?;
//! sinkhole.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`codec`]: DNS wire parsing, validation, and response synthesis
//! - [`cache`]: size-bounded TTL cache keyed by question fingerprint
//! - [`limiter`]: per-client token-bucket rate limiting
//! - [`validator`]: counting wrapper over the wire checks
//! - [`server`]: listeners, worker pool, request handler, lifecycle
//! - [`logger`]: structured request log
//! - [`metrics`] / [`health`]: counters and the HTTP health endpoint
//! - [`config`]: environment-driven configuration
//! - [`buffer`]: pooled receive buffers

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod buffer;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod health;
pub mod limiter;
pub mod logger;
pub mod metrics;
pub mod server;
pub mod validator;

// Re-export the types most callers need at the crate root
pub use cache::{CacheStats, CacheStatsSnapshot, ResponseCache};
pub use config::Config;
pub use error::{SinkholeError, SinkholeResult};
pub use limiter::{RateLimiter, RateLimiterStatsSnapshot};
pub use logger::QueryLogger;
pub use metrics::{Metrics, MetricsSnapshot};
pub use server::{Sinkhole, Transport};
pub use validator::MessageValidator;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
