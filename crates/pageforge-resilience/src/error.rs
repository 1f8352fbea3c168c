//! Error taxonomy for resilience operations.

use thiserror::Error;

/// Errors that can occur while executing an operation through a [`crate::CircuitBreaker`].
#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests.
    #[error("circuit breaker is open, rejecting requests")]
    CircuitOpen,

    /// Transient error that may be retried (timeout, rate limit, 5xx, parse-retry-exhausted).
    #[error("transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried (auth, invalid input).
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Operation exceeded its wall-clock timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Retry budget exhausted without success.
    #[error("maximum retries ({0}) exceeded")]
    MaxRetriesExceeded(usize),
}

impl ResilienceError {
    /// Transient errors are eligible for retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResilienceError::Transient(_) | ResilienceError::Timeout(_))
    }

    /// Permanent errors fail fast and are never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ResilienceError::Permanent(_) | ResilienceError::CircuitOpen)
    }

    /// Whether this error should count against the circuit breaker's failure threshold.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(self, ResilienceError::CircuitOpen)
    }
}
