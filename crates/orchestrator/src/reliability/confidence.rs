//! Confidence-gated retry for photo analysis.
//!
//! Retry success here depends on the payload, not only on the call. An
//! analysis that returns normally but reports a confidence under the
//! configured minimum is turned into a retryable `PHOTO_ANALYSIS_ERROR` and
//! goes through the same retry path as a hard failure. That rejection is
//! always retried; a custom predicate on the policy only decides for errors
//! the analysis itself raises. The last result
//! produced, even a low-confidence one, is kept outside the loop and handed
//! back on ultimate failure so callers can present a best guess.

use super::retry_policy::{RetryOutcome, RetryPolicy};
use common::{AppError, LOW_CONFIDENCE_THRESHOLD};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Results scoring strictly below this are retried
    pub min_confidence: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_confidence: LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

/// A value produced by one analysis attempt plus its optional quality score
/// in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisAttemptResult<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl<T> AnalysisAttemptResult<T> {
    pub fn new(value: T, confidence: Option<f64>) -> Self {
        Self { value, confidence }
    }

    pub fn certain(value: T) -> Self {
        Self::new(value, None)
    }

    /// A result without a score always meets the bar.
    pub fn meets(&self, min_confidence: f64) -> bool {
        self.confidence.map_or(true, |c| c >= min_confidence)
    }
}

/// Accept `result` or park it in `best_effort`, raise `rejected` and fail
/// with a retryable photo analysis error.
fn gate_confidence<T>(
    result: AnalysisAttemptResult<T>,
    min_confidence: f64,
    best_effort: &Mutex<Option<AnalysisAttemptResult<T>>>,
    rejected: &AtomicBool,
) -> anyhow::Result<AnalysisAttemptResult<T>> {
    if result.meets(min_confidence) {
        return Ok(result);
    }

    let confidence = result.confidence;
    debug!(
        confidence = confidence.unwrap_or_default(),
        min_confidence, "Analysis confidence below threshold, treating as failure"
    );
    *best_effort.lock() = Some(result);
    rejected.store(true, Ordering::SeqCst);

    Err(AppError::photo_analysis(
        format!(
            "Analysis confidence {:.2} is below the required {:.2}",
            confidence.unwrap_or_default(),
            min_confidence
        ),
        confidence,
    )
    .into())
}

/// Run `operation` under `policy`, rejecting results whose confidence is
/// below `min_confidence`.
///
/// On failure the outcome carries the last low-confidence result (if any)
/// in `value` alongside the error.
pub async fn retry_photo_analysis<T, F, Fut>(
    mut operation: F,
    min_confidence: f64,
    policy: &RetryPolicy,
) -> RetryOutcome<AnalysisAttemptResult<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<AnalysisAttemptResult<T>>>,
{
    let best_effort = Mutex::new(None);
    let slot = &best_effort;

    // Clones share stats and the observer, so only the predicate changes.
    let rejected = Arc::new(AtomicBool::new(false));
    let gated = {
        let base = policy.clone();
        let rejected = Arc::clone(&rejected);
        policy
            .clone()
            .with_predicate(move |error, attempt| {
                rejected.load(Ordering::SeqCst) || base.should_retry(error, attempt)
            })
    };
    let flag = &rejected;

    let mut outcome = gated
        .run(|| {
            flag.store(false, Ordering::SeqCst);
            let attempt = operation();
            async move { gate_confidence(attempt.await?, min_confidence, slot, flag) }
        })
        .await;

    if !outcome.success {
        outcome.value = best_effort.into_inner();
        if let Some(best) = &outcome.value {
            info!(
                attempts = outcome.attempts,
                confidence = best.confidence.unwrap_or_default(),
                "Returning best-effort analysis after retries exhausted"
            );
        }
    }

    outcome
}

/// Retry policy bound to a confidence floor.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceGatedPolicy {
    config: ConfidenceConfig,
    retry: RetryPolicy,
}

impl ConfidenceGatedPolicy {
    pub fn new(config: ConfidenceConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn run<T, F, Fut>(&self, operation: F) -> RetryOutcome<AnalysisAttemptResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<AnalysisAttemptResult<T>>>,
    {
        retry_photo_analysis(operation, self.config.min_confidence, &self.retry).await
    }
}
