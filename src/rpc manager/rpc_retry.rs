//! Retry executor with endpoint rotation
//!
//! Two backoff formulas are in use:
//! - [`Backoff::Linear`]: `base * attempt`, the per-step executor default
//! - [`Backoff::ExponentialCapped`]: `min(base * 2^attempt, cap)`, used between
//!   whole-pipeline attempts

use super::rpc_config::RetrySettings;
use super::rpc_errors::{classify, ClassifiedError, ErrorClassification, RpcCallError};
use super::rpc_pool::{Endpoint, EndpointPool};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Linear { base: Duration },
    ExponentialCapped { base: Duration, cap: Duration },
}

impl Backoff {
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    pub fn exponential_capped(base: Duration, cap: Duration) -> Self {
        Backoff::ExponentialCapped { base, cap }
    }

    /// Delay before the attempt following `attempt`. Saturates instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { base } => {
                let ms = duration_ms(base).saturating_mul(attempt as u64);
                Duration::from_millis(ms)
            }
            Backoff::ExponentialCapped { base, cap } => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                let ms = duration_ms(base).saturating_mul(factor).min(duration_ms(cap));
                Duration::from_millis(ms)
            }
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Retry policy supplied per call site
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Fresh budget for every attempt; `None` leaves timing to the operation
    pub attempt_timeout: Option<Duration>,
    /// Retry only failures that rotate the endpoint; any other retryable
    /// failure is returned to the caller after one attempt
    pub transport_only: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::linear(Duration::from_secs(1)),
            attempt_timeout: None,
            transport_only: false,
        }
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::linear(base),
            attempt_timeout: None,
            transport_only: false,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::exponential_capped(base, cap),
            attempt_timeout: None,
            transport_only: false,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::linear(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
        )
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn transport_only(mut self) -> Self {
        self.transport_only = true;
        self
    }

    fn retries(&self, classification: &ErrorClassification) -> bool {
        classification.retryable && (!self.transport_only || classification.rotates_endpoint())
    }

    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self::linear(1, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Operation-agnostic retry wrapper bound to an endpoint pool
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    pool: Arc<EndpointPool>,
    default_policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(pool: Arc<EndpointPool>, default_policy: RetryPolicy) -> Self {
        Self {
            pool,
            default_policy,
        }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Run `operation` with the executor's default policy
    pub async fn run<T, F, Fut>(&self, op_name: &str, operation: F) -> Result<T, ClassifiedError>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: Future<Output = Result<T, RpcCallError>>,
    {
        let policy = self.default_policy.clone();
        self.execute(op_name, &policy, operation).await
    }

    /// Invoke `operation` against the current endpoint until it succeeds, fails
    /// with a non-retryable classification, or the policy runs out of attempts.
    ///
    /// Transport failures rotate the pool before the next attempt. Every failure
    /// is classified exactly once, here.
    pub async fn execute<T, F, Fut>(
        &self,
        op_name: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: Future<Output = Result<T, RpcCallError>>,
    {
        let max_attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            let endpoint = self.pool.current_endpoint();
            let outcome = match policy.attempt_timeout {
                Some(budget) => {
                    match tokio::time::timeout(budget, operation(endpoint.clone())).await {
                        Ok(result) => result,
                        Err(_) => Err(RpcCallError::timeout(budget)),
                    }
                }
                None => operation(endpoint.clone()).await,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = op_name,
                            attempts = attempt,
                            endpoint = %endpoint,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let classification = classify(&error);
            if !policy.retries(&classification) || attempt >= max_attempts {
                warn!(
                    operation = op_name,
                    attempt,
                    max_attempts,
                    endpoint = %endpoint,
                    kind = %classification.kind,
                    retryable = classification.retryable,
                    error = %error,
                    "Operation failed, not retrying"
                );
                return Err(ClassifiedError {
                    endpoint: endpoint.url().to_string(),
                    error,
                    classification,
                    attempts: attempt,
                });
            }

            if classification.rotates_endpoint() {
                warn!(
                    operation = op_name,
                    attempt,
                    endpoint = %endpoint,
                    error = %error,
                    "RPC error, switching endpoint"
                );
                self.pool.advance();
            }

            let delay = policy.backoff.delay(attempt);
            debug!(
                operation = op_name,
                attempt,
                kind = %classification.kind,
                backoff_ms = delay.as_millis() as u64,
                "Retryable error, backing off"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_backoff() {
        let backoff = Backoff::linear(Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let backoff = Backoff::exponential_capped(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay(3), Duration::from_millis(8000));
        assert_eq!(backoff.delay(4), Duration::from_millis(10_000));
        assert_eq!(backoff.delay(200), Duration::from_millis(10_000));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Backoff::linear(Duration::from_secs(1)));
        assert_eq!(RetryPolicy::linear(0, Duration::ZERO).attempts(), 1);
        assert!(!policy.transport_only);
    }

    proptest! {
        #[test]
        fn exponential_delay_is_monotonic_and_capped(
            attempt in 0u32..512,
            base_ms in 1u64..5_000,
            cap_ms in 1u64..60_000,
        ) {
            let backoff = Backoff::exponential_capped(
                Duration::from_millis(base_ms),
                Duration::from_millis(cap_ms),
            );
            let current = backoff.delay(attempt);
            let next = backoff.delay(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_millis(cap_ms));
        }
    }
}
