//! Circuit breaker with exponential backoff, shared by the Store's `safe_commit`
//! and the Normalizer adapter's call retry loop.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ResilienceError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open { next_probe: Instant },
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: usize,
    /// Consecutive successes in half-open before closing again.
    pub success_threshold: usize,
    /// How long the breaker stays open before probing.
    pub cooldown: Duration,
    /// First retry delay.
    pub initial_backoff: Duration,
    /// Ceiling on the backoff delay.
    pub max_backoff: Duration,
    /// Backoff growth factor.
    pub backoff_multiplier: f64,
    /// Retry attempts per `execute` call, beyond the first.
    pub max_retries: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_retries: 3,
        }
    }
}

struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
}

/// Protects a fallible async operation against cascading failure, retrying
/// transient errors with exponential backoff and tripping open after a run
/// of failures so a struggling dependency stops being hammered.
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
            })),
        }
    }

    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn reset(&self) {
        let mut guard = self.state.lock().await;
        guard.state = CircuitState::Closed;
        guard.consecutive_failures = 0;
        guard.consecutive_successes = 0;
    }

    /// Runs `op`, retrying transient failures with exponential backoff up to
    /// `config.max_retries` additional attempts. Non-transient failures and
    /// an open circuit fail fast.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.check_and_update_state().await?;

        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => {
                    self.on_success().await;
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    self.on_failure(&err).await;
                    attempt += 1;
                    debug!(attempt, ?backoff, "retrying after transient failure");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(
                        Duration::from_secs_f64(backoff.as_secs_f64() * self.config.backoff_multiplier),
                        self.config.max_backoff,
                    );
                }
                Err(err) if err.is_transient() => {
                    self.on_failure(&err).await;
                    return Err(ResilienceError::MaxRetriesExceeded(self.config.max_retries));
                }
                Err(err) => {
                    self.on_failure(&err).await;
                    return Err(err);
                }
            }
        }
    }

    /// Runs `op` once, circuit-protected but without retry.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.check_and_update_state().await?;
        match op().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure(&err).await;
                Err(err)
            }
        }
    }

    async fn check_and_update_state(&self) -> Result<(), ResilienceError> {
        let mut guard = self.state.lock().await;
        match guard.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { next_probe } => {
                if Instant::now() >= next_probe {
                    guard.state = CircuitState::HalfOpen;
                    guard.consecutive_successes = 0;
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen)
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut guard = self.state.lock().await;
        guard.consecutive_failures = 0;
        match guard.state {
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = CircuitState::Closed;
                }
            }
            CircuitState::Closed => {}
            CircuitState::Open { .. } => {}
        }
    }

    async fn on_failure(&self, error: &ResilienceError) {
        if !error.should_trip_breaker() {
            return;
        }
        let mut guard = self.state.lock().await;
        guard.consecutive_successes = 0;
        guard.consecutive_failures += 1;
        if guard.consecutive_failures >= self.config.failure_threshold {
            let next_probe = Instant::now() + self.config.cooldown;
            warn!(?next_probe, "circuit breaker tripped open");
            guard.state = CircuitState::Open { next_probe };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn closed_to_open_after_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            max_retries: 0,
            ..Default::default()
        });
        for _ in 0..2 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(ResilienceError::Transient("boom".into())) })
                .await;
        }
        assert!(matches!(breaker.get_state().await, CircuitState::Open { .. }));
    }

    #[tokio::test]
    async fn half_open_to_closed_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            cooldown: Duration::from_millis(10),
            max_retries: 0,
            ..Default::default()
        });
        let _ = breaker
            .execute(|| async { Err::<(), _>(ResilienceError::Transient("boom".into())) })
            .await;
        assert!(matches!(breaker.get_state().await, CircuitState::Open { .. }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let ok = breaker.execute(|| async { Ok::<_, ResilienceError>(42) }).await;
        assert_eq!(ok.unwrap(), 42);
        assert_eq!(breaker.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_retries: 3,
            ..Default::default()
        });
        let counter = attempts.clone();
        let result = breaker
            .execute(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ResilienceError::Transient("not yet".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_fails_fast() {
        let breaker = CircuitBreaker::new_default();
        let result = breaker
            .execute(|| async { Err::<(), _>(ResilienceError::Permanent("bad auth".into())) })
            .await;
        assert!(matches!(result, Err(ResilienceError::Permanent(_))));
    }

    #[tokio::test]
    async fn reset_clears_state() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            max_retries: 0,
            ..Default::default()
        });
        let _ = breaker
            .execute(|| async { Err::<(), _>(ResilienceError::Transient("boom".into())) })
            .await;
        assert!(matches!(breaker.get_state().await, CircuitState::Open { .. }));
        breaker.reset().await;
        assert_eq!(breaker.get_state().await, CircuitState::Closed);
    }
}
