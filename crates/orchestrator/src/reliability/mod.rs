//! Reliability Module
//!
//! Retry with exponential backoff, per-dependency circuit breakers and the
//! confidence-gated policy used for photo analysis. [`ResilientExecutor`]
//! composes them: the retry loop is outermost and every attempt passes
//! through the breaker for its dependency key.

pub mod circuit_breaker;
pub mod confidence;
pub mod retry_policy;

pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState, CircuitBreakerStats,
    CircuitState,
};
pub use confidence::{
    retry_photo_analysis, AnalysisAttemptResult, ConfidenceConfig, ConfidenceGatedPolicy,
};
pub use retry_policy::{
    backoff_delay, default_should_retry, RetryConfig, RetryObserver, RetryOutcome, RetryPolicy,
    RetryPredicate, RetryStats,
};

use crate::config::OrchestrationConfig;
use common::{AppError, TaxonomyResultExt};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

const PHOTO_ANALYSIS_UNAVAILABLE: &str = "Photo analysis is temporarily unavailable";

/// Runs operations against named dependencies with retry and circuit
/// breaking applied.
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    registry: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    config: OrchestrationConfig,
}

impl ResilientExecutor {
    /// Share `registry` with other executors so they see the same breaker
    /// state per dependency key. Thresholds and cooldowns come from the
    /// registry; `config.circuit_breaker` only seeds [`Self::from_config`].
    pub fn new(config: &OrchestrationConfig, registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            registry,
            retry: RetryPolicy::new(config.retry),
            config: config.clone(),
        }
    }

    /// Executor with its own breaker registry.
    pub fn from_config(config: &OrchestrationConfig) -> Self {
        let registry = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker));
        Self::new(config, registry)
    }

    /// Replace the retry policy, e.g. to install a custom predicate or
    /// observer.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Retry `operation` with each attempt guarded by the breaker for
    /// `dependency_key`. Returns the last observed error on failure.
    pub async fn execute<T, F, Fut>(&self, dependency_key: &str, operation: F) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let registry: &CircuitBreakerRegistry = &self.registry;
        let operation = &operation;

        debug!(dependency = %dependency_key, "Executing resilient operation");
        self.retry
            .execute(move || registry.call(dependency_key, operation))
            .await
    }

    /// Confidence-gated photo analysis against `dependency_key`.
    ///
    /// Errors from `operation` that are not already taxonomy errors become a
    /// generic `PHOTO_ANALYSIS_ERROR`; the cause is only logged.
    pub async fn analyze_photo<T, F, Fut>(
        &self,
        dependency_key: &str,
        operation: F,
    ) -> RetryOutcome<AnalysisAttemptResult<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<AnalysisAttemptResult<T>>>,
    {
        let registry: &CircuitBreakerRegistry = &self.registry;
        let operation = &operation;

        debug!(dependency = %dependency_key, "Starting photo analysis");
        retry_photo_analysis(
            move || async move {
                registry
                    .call(dependency_key, move || async move {
                        operation().await.or_taxonomy(|| {
                            AppError::photo_analysis(PHOTO_ANALYSIS_UNAVAILABLE, None)
                        })
                    })
                    .await
            },
            self.config.confidence.min_confidence,
            &self.retry,
        )
        .await
    }
}
