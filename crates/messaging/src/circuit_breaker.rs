//! Circuit breaker for calls into external dependencies.
//!
//! The breaker monitors an operation and opens once failures reach a
//! threshold, short-circuiting further calls for a cool-down period so a
//! known-down dependency fails fast instead of queueing load. After the
//! cool-down a limited number of trial calls probe for recovery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: usize,
    /// How long the circuit stays open before admitting trial calls.
    pub cooldown: Duration,
    /// Successful trial calls required to close the circuit again.
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; failures are counted.
    Closed,
    /// Failing fast; calls are rejected until the cool-down elapses.
    Open,
    /// Trial calls are probing whether the dependency recovered.
    HalfOpen,
}

/// Errors from circuit breaker calls.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the call was rejected without being attempted.
    #[error("circuit breaker is open")]
    Open,
    /// The wrapped operation failed.
    #[error("operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: usize,
    successes: usize,
    opened_at: Option<Instant>,
}

/// Circuit breaker wrapping calls to one external dependency.
///
/// Cheap to clone; clones share state, so one breaker instance guards one
/// dependency regardless of how many callers hold it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    /// Creates a new breaker in the closed state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Runs an operation through the breaker.
    ///
    /// Returns `CircuitBreakerError::Open` without attempting the operation
    /// if the circuit is open and the cool-down has not elapsed.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.write().await;
            if inner.state == CircuitState::Open {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.cooldown);

                if cooled_down {
                    tracing::info!("circuit breaker half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                } else {
                    metrics::counter!("circuit_breaker_rejections").increment(1);
                    return Err(CircuitBreakerError::Open);
                }
            }
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    tracing::info!("circuit breaker closed after recovery");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(failures = inner.failures, "circuit breaker opened");
                    metrics::counter!("circuit_breaker_opened").increment(1);
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("trial call failed, circuit breaker re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.successes = 0;
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_breaker(cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_millis(cooldown_ms),
            success_threshold: 1,
        })
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    #[tokio::test]
    async fn starts_closed_and_passes_calls() {
        let breaker = test_breaker(50);
        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = test_breaker(10_000);

        assert!(matches!(
            fail(&breaker).await,
            Err(CircuitBreakerError::Inner(_))
        ));
        assert!(matches!(
            fail(&breaker).await,
            Err(CircuitBreakerError::Inner(_))
        ));
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Rejected without invoking the operation
        let result = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = test_breaker(10_000);

        let _ = fail(&breaker).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        let _ = fail(&breaker).await;

        // One failure after a success: still closed.
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn closes_after_successful_trial_call() {
        let breaker = test_breaker(20);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let result = breaker.call(|| async { Ok::<_, &str>(7) }).await;
        assert!(matches!(result, Ok(7)));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_trial_call_reopens() {
        let breaker = test_breaker(20);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let breaker = test_breaker(10_000);
        let clone = breaker.clone();

        let _ = fail(&breaker).await;
        let _ = fail(&clone).await;

        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(clone.state().await, CircuitState::Open);
    }
}
