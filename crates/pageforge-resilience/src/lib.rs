//! Pure-logic fault tolerance primitives: a circuit breaker with exponential
//! backoff and a small error taxonomy distinguishing transient from
//! permanent failures. Used by the store's `safe_commit` and by the
//! normalizer adapter's retry loop so both share one notion of "retryable".

pub mod circuit_breaker;
pub mod error;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::ResilienceError;

pub mod prelude {
    pub use crate::{CircuitBreaker, CircuitBreakerConfig, CircuitState, ResilienceError};
}
