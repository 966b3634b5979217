//! Resilience policy for gateway calls: retry layered under a circuit
//! breaker.

use messaging::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryPolicy, retry_with_backoff,
};

use crate::error::SagaError;

/// Wraps every call into one external dependency.
///
/// Transient transport faults are retried with jittered backoff; repeated
/// failure opens the breaker so further calls fail fast instead of queueing
/// load against a known-down dependency. One policy instance guards one
/// dependency; clones share the breaker.
#[derive(Clone)]
pub struct GatewayPolicy {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl GatewayPolicy {
    /// Creates a policy with the given retry schedule and breaker config.
    pub fn new(retry: RetryPolicy, breaker: CircuitBreakerConfig) -> Self {
        Self {
            retry,
            breaker: CircuitBreaker::new(breaker),
        }
    }

    /// Runs a gateway operation under retry and the circuit breaker.
    ///
    /// Only `Err` results are retried: a gateway decline travels inside
    /// `Ok` and is a normal saga branch, never retried here.
    pub async fn execute<F, Fut, T>(&self, context: &str, operation: F) -> Result<T, SagaError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, SagaError>>,
    {
        let result = self
            .breaker
            .call(|| retry_with_backoff(&operation, &self.retry, context))
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open) => {
                tracing::warn!(context, "gateway call rejected, circuit open");
                Err(SagaError::Gateway(format!("{context}: circuit open")))
            }
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }

    /// Returns the underlying breaker, for observability.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), CircuitBreakerConfig::default())
    }
}
