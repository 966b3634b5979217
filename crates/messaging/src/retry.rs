//! Retry with jittered exponential backoff for transient failures.

use std::time::Duration;

use tokio::time::sleep;

/// Retry policy: bounded attempts, exponential backoff with cap and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff before the first retry (doubles on each subsequent retry).
    pub initial_backoff: Duration,
    /// Cap on the exponential growth.
    pub max_backoff: Duration,
    /// Fraction of the computed backoff added at random (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff to sleep after the given failed attempt (1-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent));
        let capped = base.min(self.max_backoff);

        if self.jitter <= 0.0 {
            return capped;
        }

        capped + capped.mul_f64(self.jitter * rand::random::<f64>())
    }
}

/// Retries a fallible async operation according to the policy.
///
/// Returns the first success, or the last error once the attempt budget is
/// exhausted. `context` labels the operation in logs.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    policy: &RetryPolicy,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(context, attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        context,
                        attempts = attempt,
                        error = %e,
                        "operation failed after max attempts"
                    );
                    return Err(e);
                }

                let backoff = policy.backoff_for_attempt(attempt);
                tracing::warn!(
                    context,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "operation failed, retrying with backoff"
                );
                metrics::counter!("retry_attempts_total").increment(1);

                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            jitter: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(35),
            jitter: 0.0,
        };

        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(35));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(35));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter: 0.5,
        };

        for _ in 0..100 {
            let backoff = policy.backoff_for_attempt(1);
            assert!(backoff >= Duration::from_millis(100));
            assert!(backoff <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let result = retry_with_backoff(
            || async { Ok::<_, String>(42) },
            &fast_policy(3),
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn succeeds_after_failures() {
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let mut count = attempts.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(format!("attempt {}", *count))
                    } else {
                        Ok(42)
                    }
                }
            },
            &fast_policy(3),
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn fails_after_max_attempts() {
        let result = retry_with_backoff(
            || async { Err::<i32, _>("persistent error") },
            &fast_policy(2),
            "test_operation",
        )
        .await;

        assert_eq!(result, Err("persistent error"));
    }
}
