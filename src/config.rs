//! Sinkhole configuration
//!
//! Configuration is loaded from environment variables, validated once at
//! startup, and immutable afterwards.
//!
//! # Recognized variables
//!
//! | Name | Meaning | Default |
//! |------|---------|---------|
//! | `DNS_PORT` | DNS UDP/TCP port | `25353` |
//! | `HEALTH_CHECK_PORT` | HTTP port for health/metrics | `8088` |
//! | `WORKER_COUNT` | Worker tasks | `4` |
//! | `RATE_LIMIT` | Tokens/second per client | `100000` |
//! | `RATE_BURST` | Bucket size per client | `1000` |
//! | `CACHE_TTL` | Cache entry lifetime | `30m` |
//! | `CACHE_CLEANUP` | Cache sweep interval | `1m` |
//! | `LOGS_DIR` | Request log directory | `./logs` |
//! | `LOG_FILE` | Request log basename | `dns_listener.log` |
//! | `DEBUG` | Mirror request log to stdout | `false` |
//!
//! Durations are duration strings (`30m`, `90s`, `1h30m`, `500ms`); bare
//! integers are rejected. An unparseable value is a configuration error,
//! not a silent fallback to the default.
//!
//! # Example
//!
//! ```
//! use dns_sinkhole::config::Config;
//!
//! let config = Config::default();
//! assert_eq!(config.port, 25353);
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SinkholeError, SinkholeResult};

// Environment variable names
const ENV_DNS_PORT: &str = "DNS_PORT";
const ENV_HEALTH_PORT: &str = "HEALTH_CHECK_PORT";
const ENV_WORKER_COUNT: &str = "WORKER_COUNT";
const ENV_RATE_LIMIT: &str = "RATE_LIMIT";
const ENV_RATE_BURST: &str = "RATE_BURST";
const ENV_CACHE_TTL: &str = "CACHE_TTL";
const ENV_CACHE_CLEANUP: &str = "CACHE_CLEANUP";
const ENV_LOGS_DIR: &str = "LOGS_DIR";
const ENV_LOG_FILE: &str = "LOG_FILE";
const ENV_DEBUG: &str = "DEBUG";

/// Default DNS port
pub const DEFAULT_DNS_PORT: u16 = 25353;
/// Default health check port
pub const DEFAULT_HEALTH_PORT: u16 = 8088;
/// Default worker count
pub const DEFAULT_WORKER_COUNT: usize = 4;
/// Default per-client rate limit (tokens/second)
pub const DEFAULT_RATE_LIMIT: f64 = 100_000.0;
/// Default per-client burst size
pub const DEFAULT_RATE_BURST: u32 = 1_000;
/// Default cache entry lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
/// Default cache sweep interval
pub const DEFAULT_CACHE_CLEANUP: Duration = Duration::from_secs(60);
/// Default cache byte budget (100 MiB)
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 100 * 1024 * 1024;
/// Default synthesized answer address
pub const DEFAULT_RESPONSE_IP: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
/// Default synthesized answer TTL in seconds
pub const DEFAULT_RESPONSE_TTL: u32 = 300;
/// Default log directory
pub const DEFAULT_LOGS_DIR: &str = "./logs";
/// Default log file basename
pub const DEFAULT_LOG_FILE: &str = "dns_listener.log";

/// Upper bound on the per-client rate limit
const MAX_RATE_LIMIT: f64 = 1_000_000.0;
/// Upper bound on the per-client burst size
const MAX_RATE_BURST: u32 = 10_000;
/// Upper bound on the worker count
const MAX_WORKER_COUNT: usize = 128;

/// Immutable sinkhole configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS port, shared by UDP and TCP
    pub port: u16,
    /// HTTP port for `/health` and `/metrics`; must differ from `port`
    pub health_port: u16,
    /// Number of workers draining the request queue
    pub worker_count: usize,
    /// Per-client refill rate in tokens/second
    pub rate_limit: f64,
    /// Per-client bucket capacity
    pub rate_burst: u32,
    /// Cache entry lifetime
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
    /// Cache sweep interval; must not exceed `cache_ttl`
    #[serde(with = "duration_secs")]
    pub cache_cleanup_interval: Duration,
    /// Cache byte budget
    pub cache_max_bytes: u64,
    /// IPv4 address placed in every synthesized answer
    pub response_ip: Ipv4Addr,
    /// TTL in seconds placed in every synthesized answer
    pub response_ttl: u32,
    /// Directory for the request log
    pub logs_dir: PathBuf,
    /// Request log basename; the file is written as `YYYY-MM-DD_<basename>`
    pub log_file: String,
    /// Mirror request log records to stdout
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_DNS_PORT,
            health_port: DEFAULT_HEALTH_PORT,
            worker_count: DEFAULT_WORKER_COUNT,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_burst: DEFAULT_RATE_BURST,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_cleanup_interval: DEFAULT_CACHE_CLEANUP,
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            response_ip: DEFAULT_RESPONSE_IP,
            response_ttl: DEFAULT_RESPONSE_TTL,
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
            log_file: DEFAULT_LOG_FILE.to_string(),
            debug: false,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns `SinkholeError::Config` naming the variable when a value is
    /// present but unparseable.
    pub fn from_env() -> SinkholeResult<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map
    ///
    /// Split out of [`from_env`](Self::from_env) so tests can exercise
    /// parsing without mutating the process environment.
    pub fn from_vars(vars: &HashMap<String, String>) -> SinkholeResult<Self> {
        let mut cfg = Self::default();

        if let Some(v) = get_set(vars, ENV_DNS_PORT) {
            cfg.port = parse_port(v, ENV_DNS_PORT)?;
        }
        if let Some(v) = get_set(vars, ENV_HEALTH_PORT) {
            cfg.health_port = parse_port(v, ENV_HEALTH_PORT)?;
        }
        if let Some(v) = get_set(vars, ENV_WORKER_COUNT) {
            cfg.worker_count = v.parse().map_err(|_| {
                SinkholeError::config_field(format!("not a valid count: {v:?}"), ENV_WORKER_COUNT)
            })?;
        }
        if let Some(v) = get_set(vars, ENV_RATE_LIMIT) {
            cfg.rate_limit = v.parse().map_err(|_| {
                SinkholeError::config_field(format!("not a valid rate: {v:?}"), ENV_RATE_LIMIT)
            })?;
        }
        if let Some(v) = get_set(vars, ENV_RATE_BURST) {
            cfg.rate_burst = v.parse().map_err(|_| {
                SinkholeError::config_field(format!("not a valid burst: {v:?}"), ENV_RATE_BURST)
            })?;
        }
        if let Some(v) = get_set(vars, ENV_CACHE_TTL) {
            cfg.cache_ttl = parse_duration(v)
                .map_err(|reason| SinkholeError::config_field(reason, ENV_CACHE_TTL))?;
        }
        if let Some(v) = get_set(vars, ENV_CACHE_CLEANUP) {
            cfg.cache_cleanup_interval = parse_duration(v)
                .map_err(|reason| SinkholeError::config_field(reason, ENV_CACHE_CLEANUP))?;
        }
        if let Some(v) = get_set(vars, ENV_LOGS_DIR) {
            cfg.logs_dir = PathBuf::from(v);
        }
        if let Some(v) = get_set(vars, ENV_LOG_FILE) {
            cfg.log_file = v.to_string();
        }
        if let Some(v) = get_set(vars, ENV_DEBUG) {
            cfg.debug = match v {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(SinkholeError::config_field(
                        format!("not a valid boolean: {other:?}"),
                        ENV_DEBUG,
                    ))
                }
            };
        }

        Ok(cfg)
    }

    /// Override the DNS port (CLI `listen [port]`)
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the synthesized answer address
    #[must_use]
    pub fn with_response_ip(mut self, ip: Ipv4Addr) -> Self {
        self.response_ip = ip;
        self
    }

    /// Override the synthesized answer TTL
    #[must_use]
    pub fn with_response_ttl(mut self, ttl: u32) -> Self {
        self.response_ttl = ttl;
        self
    }

    /// Override the cache byte budget
    #[must_use]
    pub fn with_cache_max_bytes(mut self, max_bytes: u64) -> Self {
        self.cache_max_bytes = max_bytes;
        self
    }

    /// Validate the configuration
    ///
    /// # Validation rules
    ///
    /// - DNS port and health port must be non-zero in production use
    ///   (port 0 is allowed so tests can bind ephemeral ports) and must
    ///   differ from each other
    /// - worker count in 1..=128
    /// - rate limit in (0, 1 000 000]; burst in (0, 10 000] and ≤ rate limit
    /// - cache TTL positive; cleanup interval positive and ≤ TTL
    ///
    /// # Errors
    ///
    /// Returns `SinkholeError::Config` naming the first offending field.
    pub fn validate(&self) -> SinkholeResult<()> {
        if self.port != 0 && self.port == self.health_port {
            return Err(SinkholeError::config_field(
                "health check port cannot be the same as the DNS port",
                ENV_HEALTH_PORT,
            ));
        }
        if self.worker_count < 1 || self.worker_count > MAX_WORKER_COUNT {
            return Err(SinkholeError::config_field(
                format!(
                    "must be between 1 and {MAX_WORKER_COUNT}, got {}",
                    self.worker_count
                ),
                ENV_WORKER_COUNT,
            ));
        }
        if self.rate_limit <= 0.0 || self.rate_limit > MAX_RATE_LIMIT {
            return Err(SinkholeError::config_field(
                format!("must be in (0, {MAX_RATE_LIMIT:.0}], got {}", self.rate_limit),
                ENV_RATE_LIMIT,
            ));
        }
        if self.rate_burst == 0 || self.rate_burst > MAX_RATE_BURST {
            return Err(SinkholeError::config_field(
                format!("must be in (0, {MAX_RATE_BURST}], got {}", self.rate_burst),
                ENV_RATE_BURST,
            ));
        }
        if f64::from(self.rate_burst) > self.rate_limit {
            return Err(SinkholeError::config_field(
                format!(
                    "burst ({}) cannot be greater than rate limit ({:.0})",
                    self.rate_burst, self.rate_limit
                ),
                ENV_RATE_BURST,
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(SinkholeError::config_field(
                "must be a positive duration",
                ENV_CACHE_TTL,
            ));
        }
        if self.cache_cleanup_interval.is_zero() || self.cache_cleanup_interval > self.cache_ttl {
            return Err(SinkholeError::config_field(
                "must be positive and no greater than the cache TTL",
                ENV_CACHE_CLEANUP,
            ));
        }
        if self.cache_max_bytes == 0 {
            return Err(SinkholeError::config_field(
                "cache byte budget must be positive",
                "cache_max_bytes",
            ));
        }
        Ok(())
    }
}

fn get_set<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn parse_port(value: &str, field: &str) -> SinkholeResult<u16> {
    value
        .parse::<u16>()
        .map_err(|_| SinkholeError::config_field(format!("not a valid port: {value:?}"), field))
        .and_then(|p| {
            if p == 0 {
                Err(SinkholeError::config_field("port must be 1-65535", field))
            } else {
                Ok(p)
            }
        })
}

/// Parse a duration string such as `30m`, `90s`, `1h30m`, or `500ms`
///
/// Bare integers are rejected: the unit must always be explicit so a value
/// meant as minutes is never read as seconds.
///
/// # Errors
///
/// Returns a description of the problem on malformed input.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut chars = s.char_indices().peekable();
    let mut parsed_any = false;

    while chars.peek().is_some() {
        let start = chars.peek().map_or(0, |&(i, _)| i);
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if end == start {
            return Err(format!("expected a number in duration {input:?}"));
        }
        let number: f64 = s[start..end]
            .parse()
            .map_err(|_| format!("bad number in duration {input:?}"))?;
        if number < 0.0 {
            return Err(format!("negative duration {input:?}"));
        }

        let unit_start = end;
        let mut unit_end = unit_start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit_end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let unit = &s[unit_start..unit_end];
        let unit_secs = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {input:?} (use ms/s/m/h)")),
            other => return Err(format!("unknown duration unit {other:?} in {input:?}")),
        };
        total += Duration::from_secs_f64(number * unit_secs);
        parsed_any = true;
    }

    if parsed_any {
        Ok(total)
    } else {
        Err(format!("unparseable duration {input:?}"))
    }
}

/// Serde helpers storing `Duration` as whole seconds
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
