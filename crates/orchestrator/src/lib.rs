//! Resilient Operation Orchestration
//!
//! Makes unreliable, latency-variable external calls (AI inference, database
//! writes, object storage) behave predictably for multi-step user workflows.
//!
//! # Architecture
//!
//! - **RetryPolicy**: bounded retry with deterministic exponential backoff and
//!   a pluggable retry predicate
//! - **CircuitBreakerRegistry**: per-dependency breakers that fail fast while
//!   a dependency is down
//! - **ConfidenceGatedPolicy**: photo-analysis retry where a successful call
//!   with a low confidence score is retried, keeping the best guess
//! - **ResilientExecutor**: retry outermost, breaker around every attempt
//! - **SessionRecoveryCache**: time-boxed snapshots that let a client resume
//!   an interrupted conversation
//!
//! Every failure that leaves this crate is a [`common::AppError`].
//!
//! # Usage
//!
//! ```no_run
//! use orchestrator::{AnalysisAttemptResult, OrchestrationConfig, ResilientExecutor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = ResilientExecutor::from_config(&OrchestrationConfig::default());
//!
//!     let saved = executor
//!         .execute("postgres-profiles", || async { Ok::<_, anyhow::Error>(()) })
//!         .await?;
//!
//!     let outcome = executor
//!         .analyze_photo("vision-color-palette", || async {
//!             Ok(AnalysisAttemptResult::new(vec!["navy", "cream"], Some(0.82)))
//!         })
//!         .await;
//!     println!("palette: {:?}, success: {}", outcome.value, outcome.success);
//!     Ok(saved)
//! }
//! ```

pub mod config;
pub mod reliability;
pub mod session;

pub use config::OrchestrationConfig;
pub use reliability::{
    backoff_delay, retry_photo_analysis, AnalysisAttemptResult, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitBreakerState, CircuitBreakerStats, ConfidenceConfig,
    ConfidenceGatedPolicy, ResilientExecutor, RetryConfig, RetryOutcome, RetryPolicy, RetryStats,
};
pub use session::{
    FileSessionStore, InMemorySessionStore, RecoveryOffer, SessionKind, SessionRecoveryCache,
    SessionRecoveryConfig, SessionRecoveryRecord, SessionStore, SessionStoreError,
};
