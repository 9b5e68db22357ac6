//! Photo Onboarding Example
//!
//! Runs a flaky photo analysis through the resilient executor, saves the
//! onboarding state after the turn, and shows the recovery offer a returning
//! user would see.

use common::{init_structured_logging, AppError, LoggingConfig};
use orchestrator::{
    AnalysisAttemptResult, OrchestrationConfig, ResilientExecutor, RetryConfig, SessionKind,
    SessionRecoveryCache, SessionRecoveryRecord,
};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging(LoggingConfig::default())?;

    let mut config = OrchestrationConfig::default();
    config.retry = RetryConfig {
        max_retries: 3,
        base_delay_ms: 50,
        max_delay_ms: 500,
    };
    let executor = ResilientExecutor::from_config(&config);

    // First call times out, second is unsure, third is confident.
    let calls = AtomicU32::new(0);
    let outcome = executor
        .analyze_photo("vision-color-palette", || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(AppError::ai_service("vision model timed out", false).into()),
                1 => Ok(AnalysisAttemptResult::new(vec!["grey"], Some(0.41))),
                _ => Ok(AnalysisAttemptResult::new(vec!["navy", "cream"], Some(0.88))),
            }
        })
        .await;

    println!(
        "analysis success={} attempts={} elapsed={}ms palette={:?}",
        outcome.success,
        outcome.attempts,
        outcome.elapsed_ms(),
        outcome.value.as_ref().map(|v| &v.value)
    );

    let sessions = SessionRecoveryCache::in_memory(config.session_recovery.clone());
    let mut payload = Map::new();
    payload.insert("step".to_string(), json!("palette_review"));
    payload.insert("palette".to_string(), json!(outcome.value.map(|v| v.value)));
    let record = SessionRecoveryRecord::new("sess-demo", "user-demo", SessionKind::Onboarding, payload);
    sessions.save(record).await;

    if let Some(offer) = sessions
        .check_for_recovery("user-demo", SessionKind::Onboarding)
        .await
    {
        println!("found session {} saved {}s ago", offer.record.session_id, offer.age.num_seconds());
        for action in &offer.actions {
            println!("  - {}: {}", action.label, action.description);
        }
    }

    sessions.clear("user-demo", SessionKind::Onboarding).await?;
    Ok(())
}
