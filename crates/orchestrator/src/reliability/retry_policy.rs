//! Retry Policy Implementation
//!
//! Bounded retry with deterministic exponential backoff. An operation is
//! attempted at most `max_retries + 1` times; the delay before retry `k`
//! (1-indexed) is `min(base_delay * 2^(k-1), max_delay)` with no jitter.

use common::AppError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decides whether a failed attempt should be retried. Receives the error and
/// the 0-based index of the attempt that produced it.
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error, u32) -> bool + Send + Sync>;

/// Observation hook called once per scheduled retry with the error and the
/// 1-based retry number. Must not influence control flow.
pub type RetryObserver = Arc<dyn Fn(&anyhow::Error, u32) + Send + Sync>;

/// Configuration for retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        backoff_delay(retry, self.base_delay_ms, self.max_delay_ms)
    }
}

/// `min(base_delay_ms * 2^(retry-1), max_delay_ms)`, saturating on overflow.
/// Retry numbers start at 1; 0 is treated as 1.
pub fn backoff_delay(retry: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let exponent = retry.saturating_sub(1);
    let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
    Duration::from_millis(base_delay_ms.saturating_mul(factor).min(max_delay_ms))
}

/// Default predicate: retry iff the error is a retryable taxonomy error.
pub fn default_should_retry(error: &anyhow::Error, _attempt: u32) -> bool {
    AppError::is_retryable_error(error)
}

/// Result of a retry loop that does not propagate the error.
///
/// For the plain retry manager exactly one of `value`/`error` is set. The
/// confidence-gated policy may set both on failure to hand back its best
/// low-confidence result.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<AppError>,
    /// Always at least 1
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(value: T, attempts: u32, elapsed: Duration) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            attempts,
            elapsed,
        }
    }

    pub fn failed(error: AppError, attempts: u32, elapsed: Duration) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error),
            attempts,
            elapsed,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    /// Drops any best-effort value carried alongside a failure.
    pub fn into_result(self) -> Result<T, AppError> {
        match (self.value, self.error) {
            (_, Some(error)) => Err(error),
            (Some(value), None) => Ok(value),
            (None, None) => Err(AppError::internal("Retry outcome carried neither value nor error")),
        }
    }
}

/// Statistics for retry operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retry_attempts: u64,
}

impl RetryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.successful_operations as f64 / self.total_operations as f64
        }
    }
}

struct Attempted<T> {
    result: anyhow::Result<T>,
    attempts: u32,
    elapsed: Duration,
}

/// Retry manager. Cheap to clone; clones share statistics.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    should_retry: Option<RetryPredicate>,
    on_retry: Option<RetryObserver>,
    stats: Arc<Mutex<RetryStats>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("custom_predicate", &self.should_retry.is_some())
            .field("observer", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            should_retry: None,
            on_retry: None,
            stats: Arc::new(Mutex::new(RetryStats::default())),
        }
    }

    /// Replace the default predicate.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&anyhow::Error, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(&anyhow::Error, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` under the policy, returning its value or the last
    /// observed error unchanged.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_attempts(operation, None).await.result
    }

    /// Like [`RetryPolicy::execute`], but a cancelled `token` stops the loop
    /// at the next backoff and returns the last observed error.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_attempts(operation, Some(token)).await.result
    }

    /// Run `operation` and report the outcome instead of propagating the
    /// error. The error is normalized into the taxonomy.
    pub async fn run<T, F, Fut>(&self, operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let attempted = self.run_attempts(operation, None).await;
        match attempted.result {
            Ok(value) => RetryOutcome::succeeded(value, attempted.attempts, attempted.elapsed),
            Err(error) => RetryOutcome::failed(
                AppError::from_anyhow(error),
                attempted.attempts,
                attempted.elapsed,
            ),
        }
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        mut operation: F,
        cancel: Option<&CancellationToken>,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let start = Instant::now();
        // 0-based index of the attempt in flight
        let mut attempt: u32 = 0;

        loop {
            debug!(attempt = attempt + 1, "Executing operation with retry policy");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            attempts = attempt + 1,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Operation succeeded after retries"
                        );
                    }
                    self.record(true, attempt);
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt + 1,
                        elapsed: start.elapsed(),
                    };
                }
                Err(error) => error,
            };

            if attempt >= self.config.max_retries {
                warn!(
                    attempts = attempt + 1,
                    error = %error,
                    "Retry budget exhausted"
                );
                return self.give_up(error, attempt, start);
            }

            if !self.should_retry(&error, attempt) {
                debug!(
                    attempt = attempt + 1,
                    error = %error,
                    "Operation failed permanently, not retrying"
                );
                return self.give_up(error, attempt, start);
            }

            let retry = attempt + 1;
            let delay = self.config.delay_for_retry(retry);
            if let Some(observer) = &self.on_retry {
                observer(&error, retry);
            }
            debug!(
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying after delay"
            );

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            info!(attempts = attempt + 1, "Retry loop cancelled during backoff");
                            return self.give_up(error, attempt, start);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt = retry;
        }
    }

    /// The custom predicate if one is set, otherwise [`default_should_retry`].
    pub fn should_retry(&self, error: &anyhow::Error, attempt: u32) -> bool {
        match &self.should_retry {
            Some(predicate) => predicate(error, attempt),
            None => default_should_retry(error, attempt),
        }
    }

    fn give_up<T>(&self, error: anyhow::Error, attempt: u32, start: Instant) -> Attempted<T> {
        self.record(false, attempt);
        Attempted {
            result: Err(error),
            attempts: attempt + 1,
            elapsed: start.elapsed(),
        }
    }

    fn record(&self, success: bool, retries: u32) {
        let mut stats = self.stats.lock();
        stats.total_operations += 1;
        stats.total_retry_attempts += u64::from(retries);
        if success {
            stats.successful_operations += 1;
        } else {
            stats.failed_operations += 1;
        }
    }

    /// Get retry statistics
    pub fn stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = RetryStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            base_delay_ms: 10,
            max_delay_ms: 100,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_operation_no_retries() {
        let policy = RetryPolicy::default();

        let result = policy.execute(|| async { Ok::<_, anyhow::Error>(42) }).await;

        assert_eq!(result.expect("operation should succeed"), 42);
        let stats = policy.stats();
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.successful_operations, 1);
        assert_eq!(stats.total_retry_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_attempts_once() {
        let policy = fast_policy(0);
        let calls = AtomicU32::new(0);

        let outcome = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), anyhow::Error>(AppError::database("down").into()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.success);
        assert!(outcome.value.is_none());
        assert_eq!(
            outcome.error.map(|e| e.code()),
            Some(common::ErrorCode::DatabaseError)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_receives_attempt_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let policy = fast_policy(3).with_predicate(move |_, attempt| {
            seen_clone.lock().push(attempt);
            attempt < 1
        });

        let result = policy
            .execute(|| async { Err::<(), _>(anyhow::anyhow!("plain")) })
            .await;

        assert!(result.is_err());
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_not_called_on_terminal_failure() {
        let retries = Arc::new(Mutex::new(Vec::new()));
        let retries_clone = retries.clone();
        let policy = fast_policy(2).on_retry(move |_, retry| retries_clone.lock().push(retry));

        let _ = policy
            .execute(|| async { Err::<(), anyhow::Error>(AppError::storage("unavailable").into()) })
            .await;

        assert_eq!(*retries.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_last_error() {
        let policy = fast_policy(5);
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = policy
            .execute_cancellable(&token, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 2 {
                    token.cancel();
                }
                async move { Err::<(), anyhow::Error>(AppError::database(format!("failure {n}")).into()) }
            })
            .await;

        let error = result.expect_err("cancelled loop should fail");
        assert_eq!(error.to_string(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    #[case(1, 1000)]
    #[case(2, 2000)]
    #[case(3, 4000)]
    #[case(4, 8000)]
    #[case(5, 10_000)]
    #[case(64, 10_000)]
    fn test_default_backoff_schedule(#[case] retry: u32, #[case] expected_ms: u64) {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_retry(retry), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_retry_stats_success_rate() {
        let stats = RetryStats {
            total_operations: 10,
            successful_operations: 8,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 0.8);
        assert_eq!(RetryStats::default().success_rate(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_backoff_is_capped_and_non_decreasing(
            base in 1u64..5_000,
            max in 1u64..60_000,
            retry in 1u32..40,
        ) {
            let current = backoff_delay(retry, base, max);
            let next = backoff_delay(retry + 1, base, max);
            prop_assert!(current <= next);
            prop_assert!(current <= Duration::from_millis(max));
            let uncapped = base.saturating_mul(2u64.saturating_pow(retry - 1));
            prop_assert_eq!(current, Duration::from_millis(uncapped.min(max)));
        }

        #[test]
        fn prop_retryable_failure_runs_max_retries_plus_one(max_retries in 0u32..6) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .expect("runtime");
            let calls = AtomicU32::new(0);

            let result = runtime.block_on(fast_policy(max_retries).execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), anyhow::Error>(AppError::ai_service("busy", false).into())
            }));

            prop_assert!(result.is_err());
            prop_assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        }
    }
}
