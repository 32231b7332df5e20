//! Counting wrapper around the wire-format checks
//!
//! The request handler validates every inbound query before synthesis and
//! every outbound response before it is written. This wrapper keeps the
//! running totals the stats renderer and the periodic snapshot report.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec;
use crate::error::{SinkholeError, SinkholeResult};

/// Validation counters
#[derive(Debug, Default)]
pub struct ValidatorStats {
    /// Messages checked, queries and responses combined
    total_validated: AtomicU64,
    /// Queries rejected
    invalid_queries: AtomicU64,
    /// Responses rejected
    invalid_responses: AtomicU64,
}

impl ValidatorStats {
    /// Get total messages validated
    #[must_use]
    pub fn total_validated(&self) -> u64 {
        self.total_validated.load(Ordering::Relaxed)
    }

    /// Get rejected query count
    #[must_use]
    pub fn invalid_queries(&self) -> u64 {
        self.invalid_queries.load(Ordering::Relaxed)
    }

    /// Get rejected response count
    #[must_use]
    pub fn invalid_responses(&self) -> u64 {
        self.invalid_responses.load(Ordering::Relaxed)
    }

    /// Fraction of validations that passed, in [0, 1]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_validated();
        if total == 0 {
            return 1.0;
        }
        let failed = self.invalid_queries() + self.invalid_responses();
        (total - failed.min(total)) as f64 / total as f64
    }

    /// Snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> ValidatorStatsSnapshot {
        ValidatorStatsSnapshot {
            total_validated: self.total_validated(),
            invalid_queries: self.invalid_queries(),
            invalid_responses: self.invalid_responses(),
        }
    }
}

/// Snapshot of validation counters
#[derive(Debug, Clone, Copy)]
pub struct ValidatorStatsSnapshot {
    /// Messages checked
    pub total_validated: u64,
    /// Queries rejected
    pub invalid_queries: u64,
    /// Responses rejected
    pub invalid_responses: u64,
}

/// DNS message validator with counters
///
/// # Example
///
/// ```
/// use dns_sinkhole::validator::MessageValidator;
///
/// let validator = MessageValidator::new();
/// assert!(validator.validate_query(&[0u8; 4]).is_err());
/// assert_eq!(validator.stats().invalid_queries(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MessageValidator {
    stats: ValidatorStats,
}

impl MessageValidator {
    /// Create a validator with zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an inbound query
    ///
    /// # Errors
    ///
    /// Returns `SinkholeError::Validation` describing the structural defect.
    pub fn validate_query(&self, bytes: &[u8]) -> SinkholeResult<()> {
        self.stats.total_validated.fetch_add(1, Ordering::Relaxed);
        codec::validate_query(bytes).map_err(|e| {
            self.stats.invalid_queries.fetch_add(1, Ordering::Relaxed);
            SinkholeError::validation(e.to_string())
        })
    }

    /// Validate an outbound response
    ///
    /// # Errors
    ///
    /// Returns `SinkholeError::Validation` describing the structural defect.
    pub fn validate_response(&self, bytes: &[u8]) -> SinkholeResult<()> {
        self.stats.total_validated.fetch_add(1, Ordering::Relaxed);
        codec::validate_response(bytes).map_err(|e| {
            self.stats.invalid_responses.fetch_add(1, Ordering::Relaxed);
            SinkholeError::validation(e.to_string())
        })
    }

    /// Validation counters
    #[must_use]
    pub fn stats(&self) -> &ValidatorStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_query() -> Vec<u8> {
        let mut q = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        q.extend_from_slice(&[0x03, b'w', b'w', b'w', 0x00, 0x00, 0x01, 0x00, 0x01]);
        q
    }

    #[test]
    fn test_valid_query_counts_total_only() {
        let validator = MessageValidator::new();
        assert!(validator.validate_query(&valid_query()).is_ok());
        assert_eq!(validator.stats().total_validated(), 1);
        assert_eq!(validator.stats().invalid_queries(), 0);
    }

    #[test]
    fn test_invalid_query_counted() {
        let validator = MessageValidator::new();
        assert!(validator.validate_query(&[0u8; 3]).is_err());
        assert_eq!(validator.stats().invalid_queries(), 1);
        assert_eq!(validator.stats().invalid_responses(), 0);
    }

    #[test]
    fn test_invalid_response_counted() {
        let validator = MessageValidator::new();
        // QR bit clear: a query is not a valid response.
        assert!(validator.validate_response(&valid_query()).is_err());
        assert_eq!(validator.stats().invalid_responses(), 1);
        assert_eq!(validator.stats().invalid_queries(), 0);
    }

    #[test]
    fn test_valid_response_passes() {
        let validator = MessageValidator::new();
        let mut response = valid_query();
        response[2] |= 0x80;
        assert!(validator.validate_response(&response).is_ok());
        assert_eq!(validator.stats().total_validated(), 1);
    }

    #[test]
    fn test_errors_map_to_validation_kind() {
        let validator = MessageValidator::new();
        let err = validator.validate_query(&[0u8; 3]).unwrap_err();
        assert!(err.is_invalid_message());
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_success_rate() {
        let validator = MessageValidator::new();
        assert!((validator.stats().success_rate() - 1.0).abs() < f64::EPSILON);

        let _ = validator.validate_query(&valid_query());
        let _ = validator.validate_query(&[0u8; 2]);
        assert!((validator.stats().success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot() {
        let validator = MessageValidator::new();
        let _ = validator.validate_query(&valid_query());
        let _ = validator.validate_query(&[0u8; 2]);
        let _ = validator.validate_response(&valid_query());

        let snap = validator.stats().snapshot();
        assert_eq!(snap.total_validated, 3);
        assert_eq!(snap.invalid_queries, 1);
        assert_eq!(snap.invalid_responses, 1);
    }
}
