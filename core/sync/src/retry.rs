//! Exponential backoff around remote store calls.
//!
//! Only errors the caller classifies as transient are retried, and the caller
//! always sees the error of the last attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use notesync_common::{Error, Result};

/// Backoff policy. Delays grow as `initial_delay * backoff_multiplier^n`,
/// capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first try included. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.75, 1.25).
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy with `max_attempts` tries, 1s base delay doubling up to 10s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause after the `failures + 1`-th failed attempt.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let millis = (self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent))
        .min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            millis * (0.75 + rand::random::<f64>() / 2.0)
        } else {
            millis
        };

        Duration::from_millis(millis as u64)
    }

    /// Pauses taken by a call whose every attempt fails.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|failures| self.delay_for_attempt(failures))
            .collect()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Applies a [`RetryConfig`] to async operations.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retry while [`Error::is_retryable`] holds.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation, Error::is_retryable)
            .await
    }

    /// Retry while `should_retry` holds for the returned error.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut failures = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if failures > 0 {
                        debug!("Remote call recovered after {} failure(s)", failures);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            failures += 1;
            if !should_retry(&err) {
                return Err(err);
            }
            if failures >= attempts {
                warn!("Giving up after {} attempts: {}", failures, err);
                return Err(err);
            }

            let delay = self.config.delay_for_attempt(failures - 1);
            warn!(
                "Transient failure {}/{} ({}), next try in {:?}",
                failures, attempts, err, delay
            );
            sleep(delay).await;
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails its first `failures` calls with the error built by `make_err`.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        make_err: fn(u32) -> Error,
    }

    impl Flaky {
        fn new(failures: u32, make_err: fn(u32) -> Error) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                make_err,
            }
        }

        async fn call(&self) -> Result<u32> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err((self.make_err)(call))
            } else {
                Ok(call)
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn network(call: u32) -> Error {
        Error::Network(format!("reset on call {}", call))
    }

    #[test]
    fn test_default_delays_double_up_to_cap() {
        let config = RetryConfig::default();

        let delays: Vec<u64> = (0..6)
            .map(|n| config.delay_for_attempt(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_schedule() {
        assert_eq!(
            RetryConfig::default().schedule(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert!(RetryConfig::new(1).schedule().is_empty());
        assert!(RetryConfig::new(0).schedule().is_empty());
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::default().with_jitter(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay < Duration::from_millis(2500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let flaky = Flaky::new(2, network);
        let started = tokio::time::Instant::now();

        let value = RetryExecutor::default()
            .execute(|| flaky.call())
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_is_returned() {
        let flaky = Flaky::new(u32::MAX, network);

        let err = RetryExecutor::default()
            .execute(|| flaky.call())
            .await
            .unwrap_err();

        assert_eq!(flaky.calls(), 3);
        assert!(err.to_string().contains("reset on call 3"));
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let flaky = Flaky::new(u32::MAX, |_| {
            Error::ProviderQuotaOrPermission("storage full".to_string())
        });

        let result = RetryExecutor::default().execute(|| flaky.call()).await;

        assert!(matches!(result, Err(Error::ProviderQuotaOrPermission(_))));
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn test_condition_overrides_classification() {
        let flaky = Flaky::new(u32::MAX, network);
        let executor = RetryExecutor::new(RetryConfig::new(4));

        let result = executor.execute_with_condition(|| flaky.call(), |_| false).await;

        assert!(result.is_err());
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let flaky = Flaky::new(0, network);
        let executor = RetryExecutor::new(RetryConfig::new(0));

        assert_eq!(executor.execute(|| flaky.call()).await.unwrap(), 1);
        assert_eq!(executor.config().max_attempts, 0);
    }
}
