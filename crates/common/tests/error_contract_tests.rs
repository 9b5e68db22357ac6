//! The caller-facing error contract: every failure is structured, carries an
//! actionable next step and serializes to a stable envelope.

use common::{AppError, ErrorCode, ErrorEnvelope, RecoveryActionKind, TaxonomyResultExt};
use serde_json::json;

fn every_kind() -> Vec<AppError> {
    vec![
        AppError::ai_service("model overloaded", false),
        AppError::conversation("turn failed"),
        AppError::photo_analysis("blurry", Some(0.2)),
        AppError::session_expired("expired"),
        AppError::validation("bad input"),
        AppError::database("deadlock"),
        AppError::storage("bucket unavailable"),
        AppError::not_found("no such profile"),
        AppError::authentication("token expired"),
        AppError::authorization("not your project"),
        AppError::internal("bug"),
        AppError::service_unavailable("vision", None),
    ]
}

#[test]
fn test_every_error_offers_a_next_step() {
    for error in every_kind() {
        assert!(
            !error.recovery_actions().is_empty(),
            "{} has no recovery action",
            error.code()
        );
        assert!(!error.user_message().is_empty());
        assert_ne!(error.user_message(), error.message());
    }
}

#[test]
fn test_retryable_errors_offer_retry_and_hint() {
    for error in every_kind().into_iter().filter(AppError::retryable) {
        assert!(error
            .recovery_actions()
            .iter()
            .any(|a| a.kind == RecoveryActionKind::Retry));
    }
    for error in every_kind().into_iter().filter(|e| !e.retryable()) {
        assert_eq!(error.retry_after_hint_ms(), None, "{}", error.code());
    }
}

#[test]
fn test_envelope_wire_shape() -> anyhow::Result<()> {
    let error = AppError::photo_analysis("confidence too low", Some(0.5))
        .with_details(json!({ "attempts": 3 }));
    let envelope = error.to_envelope(Some("req-42".to_string()));
    let value = serde_json::to_value(&envelope)?;

    assert_eq!(value["code"], "PHOTO_ANALYSIS_ERROR");
    assert_eq!(value["requestId"], "req-42");
    assert_eq!(value["retryable"], true);
    assert_eq!(value["retryAfter"], 3000);
    assert_eq!(value["details"]["attempts"], 3);
    assert_eq!(value["recoveryActions"][0]["kind"], "retry");
    assert_eq!(value["recoveryActions"].as_array().map(Vec::len), Some(3));

    let decoded: ErrorEnvelope = serde_json::from_value(value)?;
    assert_eq!(decoded, envelope);
    Ok(())
}

#[test]
fn test_generated_request_ids_are_unique() {
    let error = AppError::internal("boom");
    let first = error.to_envelope(None);
    let second = error.to_envelope(None);
    assert_ne!(first.request_id, second.request_id);
    assert_eq!(first.code, ErrorCode::InternalServerError);
}

#[test]
fn test_boundary_normalization() {
    let raw: Result<(), std::io::Error> = Err(std::io::Error::other("socket closed"));
    let mapped = raw
        .or_taxonomy(|| AppError::storage("Upload failed"))
        .expect_err("still an error");

    let normalized = AppError::from_anyhow(mapped);
    assert_eq!(normalized.code(), ErrorCode::StorageError);
    assert_eq!(normalized.message(), "Upload failed");
    assert!(!normalized.to_envelope(None).message.contains("socket"));
}
