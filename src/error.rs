//! Error types for the sinkhole
//!
//! This module defines the error hierarchy for the whole request pipeline:
//! wire parsing, validation, rate limiting, network I/O, caching, and
//! configuration.
//!
//! # Error Categories
//!
//! - **Parse errors**: wire bytes that cannot be decoded
//! - **Validation errors**: decodable but semantically rejected messages
//! - **Rate limit errors**: client exceeded its token bucket
//! - **Network errors**: socket I/O failures
//! - **Cache/Internal errors**: internal inconsistencies
//! - **Config errors**: invalid configuration, produced only at startup
//!
//! # Example
//!
//! ```
//! use dns_sinkhole::error::SinkholeError;
//!
//! let err = SinkholeError::parse("message too short");
//! assert!(!err.is_recoverable());
//! assert!(err.to_string().contains("message too short"));
//! ```

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Error type covering every failure in the sinkhole pipeline
///
/// # Recoverability
///
/// Errors are classified as recoverable (transient, a retry may succeed)
/// or non-recoverable (the input or configuration is wrong and retrying
/// cannot help). The worker pool only retries recoverable errors.
#[derive(Debug, Error)]
pub enum SinkholeError {
    /// Wire bytes could not be decoded as a DNS message
    #[error("failed to parse DNS message: {reason}")]
    Parse {
        /// What went wrong during parsing
        reason: String,
    },

    /// Message decoded but was semantically rejected
    ///
    /// Covers a zero question count, a non-zero opcode, a question name
    /// that overflows the buffer, and a response missing its QR bit.
    #[error("invalid DNS message: {reason}")]
    Validation {
        /// Why the message was rejected
        reason: String,
    },

    /// Client exceeded its per-address token bucket
    #[error("rate limit exceeded for client {client}")]
    RateLimit {
        /// The client that ran out of tokens
        client: SocketAddr,
    },

    /// Socket I/O failure
    #[error("network error: {reason}")]
    Network {
        /// Description of the failure
        reason: String,
        /// The underlying I/O error, if available
        #[source]
        source: Option<io::Error>,
    },

    /// Cache operation failed
    #[error("cache error: {reason}")]
    Cache {
        /// Description of the cache failure
        reason: String,
    },

    /// Unexpected internal failure
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the internal error
        reason: String,
    },

    /// Invalid configuration; produced only at startup
    #[error("invalid configuration: {reason}")]
    Config {
        /// Why the configuration is invalid
        reason: String,
        /// The offending field, if known
        field: Option<String>,
    },
}

impl SinkholeError {
    // ========================================================================
    // Constructor methods
    // ========================================================================

    /// Create a parse error
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a rate limit error for a client
    pub fn rate_limit(client: SocketAddr) -> Self {
        Self::RateLimit { client }
    }

    /// Create a network error without an I/O source
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a network error wrapping an I/O error
    ///
    /// # Example
    ///
    /// ```
    /// use dns_sinkhole::error::SinkholeError;
    /// use std::io;
    ///
    /// let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
    /// let err = SinkholeError::network_io("send failed", io_err);
    /// assert!(err.to_string().contains("send failed"));
    /// ```
    pub fn network_io(reason: impl Into<String>, source: io::Error) -> Self {
        Self::Network {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Create a cache error
    pub fn cache(reason: impl Into<String>) -> Self {
        Self::Cache {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    ///
    /// # Example
    ///
    /// ```
    /// use dns_sinkhole::error::SinkholeError;
    ///
    /// let err = SinkholeError::config_field("must be between 1 and 128", "WORKER_COUNT");
    /// assert!(err.to_string().contains("must be between 1 and 128"));
    /// ```
    pub fn config_field(reason: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
            field: Some(field.into()),
        }
    }

    // ========================================================================
    // Classification methods
    // ========================================================================

    /// Check whether a retry might succeed
    ///
    /// Parse, validation, rate-limit, and config failures are deterministic
    /// for a given input; retrying them cannot change the outcome. Network,
    /// cache, and internal failures may be transient.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { source, .. } => source.as_ref().map_or(true, |e| {
                matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionRefused
                )
            }),
            Self::Cache { .. } | Self::Internal { .. } => true,
            Self::Parse { .. }
            | Self::Validation { .. }
            | Self::RateLimit { .. }
            | Self::Config { .. } => false,
        }
    }

    /// Check whether this error is a rate-limit rejection
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimit { .. })
    }

    /// Check whether this error is a parse or validation rejection
    #[must_use]
    pub fn is_invalid_message(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Validation { .. })
    }

    /// Get the configuration field associated with this error, if any
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Config { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl From<io::Error> for SinkholeError {
    fn from(err: io::Error) -> Self {
        Self::Network {
            reason: err.to_string(),
            source: Some(err),
        }
    }
}

/// Type alias for Result with [`SinkholeError`]
pub type SinkholeResult<T> = std::result::Result<T, SinkholeError>;
