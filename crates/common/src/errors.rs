//! Error taxonomy shared by every orchestration component.
//!
//! Every failure that can reach a caller is normalized into an [`AppError`]
//! before it crosses a process boundary. Each [`ErrorCode`] fixes the
//! transport status, the retryability flag, the retry-after hint and the base
//! list of [`RecoveryAction`]s; only the message and free-form details vary
//! between instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Confidence below which a photo analysis error also offers manual input.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Closed set of failure kinds recognized by the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AiServiceError,
    ConversationError,
    PhotoAnalysisError,
    SessionExpired,
    ValidationError,
    DatabaseError,
    StorageError,
    NotFound,
    AuthenticationError,
    AuthorizationError,
    InternalServerError,
    /// A circuit breaker short-circuited the call without touching the dependency.
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AiServiceError => "AI_SERVICE_ERROR",
            ErrorCode::ConversationError => "CONVERSATION_ERROR",
            ErrorCode::PhotoAnalysisError => "PHOTO_ANALYSIS_ERROR",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorCode::AuthorizationError => "AUTHORIZATION_ERROR",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Transport-layer status associated with the failure kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::AiServiceError => 503,
            ErrorCode::ConversationError => 500,
            ErrorCode::PhotoAnalysisError => 422,
            ErrorCode::SessionExpired => 401,
            ErrorCode::ValidationError => 400,
            ErrorCode::DatabaseError => 500,
            ErrorCode::StorageError => 500,
            ErrorCode::NotFound => 404,
            ErrorCode::AuthenticationError => 401,
            ErrorCode::AuthorizationError => 403,
            ErrorCode::InternalServerError => 500,
            ErrorCode::ServiceUnavailable => 503,
        }
    }

    /// Whether a retry loop should attempt again after this kind of failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorCode::AiServiceError
            | ErrorCode::ConversationError
            | ErrorCode::PhotoAnalysisError
            | ErrorCode::DatabaseError
            | ErrorCode::StorageError
            | ErrorCode::InternalServerError
            | ErrorCode::ServiceUnavailable => true,
            ErrorCode::SessionExpired
            | ErrorCode::ValidationError
            | ErrorCode::NotFound
            | ErrorCode::AuthenticationError
            | ErrorCode::AuthorizationError => false,
        }
    }

    /// Suggested delay before a caller-initiated retry.
    pub fn retry_after_hint_ms(&self) -> Option<u64> {
        match self {
            ErrorCode::AiServiceError => Some(5000),
            ErrorCode::ConversationError => Some(2000),
            ErrorCode::PhotoAnalysisError => Some(3000),
            ErrorCode::DatabaseError => Some(1000),
            ErrorCode::StorageError => Some(2000),
            ErrorCode::InternalServerError => Some(5000),
            // SERVICE_UNAVAILABLE derives it from the remaining cooldown when
            // the breaker rejects.
            _ => None,
        }
    }

    /// End-user sentence for this failure kind. The raw [`AppError::message`]
    /// is developer-facing and must not be displayed directly.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::AiServiceError => {
                "Our AI assistant is temporarily unavailable. Please try again in a moment."
            }
            ErrorCode::ConversationError => {
                "We had trouble continuing the conversation. You can try again or pick up where you left off."
            }
            ErrorCode::PhotoAnalysisError => {
                "We couldn't analyze your photo clearly. Try again with better lighting, or enter the details yourself."
            }
            ErrorCode::SessionExpired => "Your session has expired. Please start a new session.",
            ErrorCode::ValidationError => "Some of the information provided isn't valid. Please check it and try again.",
            ErrorCode::DatabaseError => "We couldn't save your changes. Please try again.",
            ErrorCode::StorageError => "We couldn't store your file. Please try again.",
            ErrorCode::NotFound => "We couldn't find what you were looking for.",
            ErrorCode::AuthenticationError => "Please sign in to continue.",
            ErrorCode::AuthorizationError => "You don't have permission to do that.",
            ErrorCode::InternalServerError => "Something went wrong on our end. Please try again.",
            ErrorCode::ServiceUnavailable => {
                "This feature is temporarily unavailable. Please try again in a few minutes."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of caller-facing recovery intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionKind {
    Retry,
    Fallback,
    Manual,
    SessionRecovery,
}

/// A structured suggestion a caller can offer to a human. Never executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub kind: RecoveryActionKind,
    pub label: String,
    pub description: String,
}

impl RecoveryAction {
    pub fn new(
        kind: RecoveryActionKind,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            label: label.into(),
            description: description.into(),
        }
    }

    pub fn retry(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(RecoveryActionKind::Retry, label, description)
    }

    pub fn fallback(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(RecoveryActionKind::Fallback, label, description)
    }

    pub fn manual(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(RecoveryActionKind::Manual, label, description)
    }

    pub fn session_recovery(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(RecoveryActionKind::SessionRecovery, label, description)
    }
}

/// Root of the error taxonomy.
///
/// Fields are fixed at construction. A retryable error always carries at least
/// one [`RecoveryActionKind::Retry`] action.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct AppError {
    code: ErrorCode,
    message: String,
    status_code: u16,
    retryable: bool,
    retry_after_hint_ms: Option<u64>,
    recovery_actions: Vec<RecoveryAction>,
    details: Option<Value>,
    confidence: Option<f64>,
}

impl AppError {
    fn with_shape(
        code: ErrorCode,
        message: impl Into<String>,
        recovery_actions: Vec<RecoveryAction>,
    ) -> Self {
        debug_assert!(
            !code.is_retryable()
                || recovery_actions
                    .iter()
                    .any(|a| a.kind == RecoveryActionKind::Retry),
            "retryable error {code} built without a retry action"
        );
        Self {
            code,
            message: message.into(),
            status_code: code.status_code(),
            retryable: code.is_retryable(),
            retry_after_hint_ms: code.retry_after_hint_ms(),
            recovery_actions,
            details: None,
            confidence: None,
        }
    }

    /// AI inference failure. Conversational callers additionally get a
    /// fallback action pointing at the structured form.
    pub fn ai_service(message: impl Into<String>, conversational: bool) -> Self {
        let mut actions = vec![RecoveryAction::retry(
            "Try again",
            "Send the request to the AI service again",
        )];
        if conversational {
            actions.push(RecoveryAction::fallback(
                "Use structured form",
                "Continue with a step-by-step form instead of the conversation",
            ));
        }
        Self::with_shape(ErrorCode::AiServiceError, message, actions)
    }

    /// Same as [`AppError::ai_service`], deriving the conversational flag from
    /// the message: it is set when the text mentions "conversation" or "chat",
    /// case-insensitively. Prefer passing the flag explicitly.
    pub fn ai_service_from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let conversational = lowered.contains("conversation") || lowered.contains("chat");
        Self::ai_service(message, conversational)
    }

    pub fn conversation(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::ConversationError,
            message,
            vec![
                RecoveryAction::retry("Try again", "Resend your last message"),
                RecoveryAction::session_recovery(
                    "Resume previous session",
                    "Pick up the conversation from the last saved point",
                ),
            ],
        )
    }

    /// Photo analysis failure. A `confidence` under
    /// [`LOW_CONFIDENCE_THRESHOLD`] adds a manual-input action.
    pub fn photo_analysis(message: impl Into<String>, confidence: Option<f64>) -> Self {
        let mut actions = vec![
            RecoveryAction::retry("Try again", "Run the photo analysis again"),
            RecoveryAction::manual(
                "Retake photo",
                "Take a new photo with better lighting and framing",
            ),
        ];
        if confidence.is_some_and(|c| c < LOW_CONFIDENCE_THRESHOLD) {
            actions.push(RecoveryAction::manual(
                "Provide input manually",
                "Enter the details yourself instead of relying on the analysis",
            ));
        }
        let mut error = Self::with_shape(ErrorCode::PhotoAnalysisError, message, actions);
        error.confidence = confidence;
        error
    }

    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::SessionExpired,
            message,
            vec![RecoveryAction::session_recovery(
                "Start new session",
                "Begin again from the first step",
            )],
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::ValidationError,
            message,
            vec![RecoveryAction::manual(
                "Correct input",
                "Review the highlighted fields and submit again",
            )],
        )
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::DatabaseError,
            message,
            vec![RecoveryAction::retry("Try again", "Save your changes again")],
        )
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::StorageError,
            message,
            vec![RecoveryAction::retry("Try again", "Upload the file again")],
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::NotFound,
            message,
            vec![RecoveryAction::manual("Go back", "Return to the previous page")],
        )
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::AuthenticationError,
            message,
            vec![RecoveryAction::manual("Sign in again", "Sign in to continue")],
        )
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::AuthorizationError,
            message,
            vec![RecoveryAction::manual(
                "Request access",
                "Ask an administrator for access to this resource",
            )],
        )
    }

    /// Catch-all for failures outside the taxonomy.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_shape(
            ErrorCode::InternalServerError,
            message,
            vec![RecoveryAction::retry("Try again", "Retry the operation")],
        )
    }

    /// Raised by a circuit breaker that refused to call `dependency_key`.
    pub fn service_unavailable(dependency_key: &str, retry_after: Option<Duration>) -> Self {
        let mut error = Self::with_shape(
            ErrorCode::ServiceUnavailable,
            format!("Service {dependency_key} is temporarily unavailable"),
            vec![RecoveryAction::retry(
                "Try again later",
                "The service is recovering; retry after a short wait",
            )],
        );
        error.retry_after_hint_ms = retry_after.map(|d| d.as_millis() as u64);
        error.details = Some(serde_json::json!({ "dependency": dependency_key }));
        error
    }

    /// Attach free-form developer details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn retry_after_hint_ms(&self) -> Option<u64> {
        self.retry_after_hint_ms
    }

    pub fn recovery_actions(&self) -> &[RecoveryAction] {
        &self.recovery_actions
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Confidence reported by the analysis that produced this error, if any.
    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn user_message(&self) -> &'static str {
        self.code.user_message()
    }

    /// True when `error` is a taxonomy error flagged as retryable.
    pub fn is_retryable_error(error: &anyhow::Error) -> bool {
        error
            .downcast_ref::<AppError>()
            .is_some_and(AppError::retryable)
    }

    /// Normalize any error into the taxonomy. Taxonomy errors pass through
    /// unchanged; anything else becomes `INTERNAL_SERVER_ERROR`.
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        match error.downcast::<AppError>() {
            Ok(app_error) => app_error,
            Err(other) => {
                warn!(cause = %format!("{other:#}"), "Unclassified error normalized to INTERNAL_SERVER_ERROR");
                AppError::internal("An unexpected error occurred")
            }
        }
    }

    /// Build the wire envelope. A fresh request id is generated when the
    /// caller has none.
    pub fn to_envelope(&self, request_id: Option<String>) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            timestamp: Utc::now(),
            request_id: request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            retryable: self.retryable,
            retry_after: self.retry_after_hint_ms,
            recovery_actions: self.recovery_actions.clone(),
        }
    }
}

/// Serializable error payload that crosses the process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub recovery_actions: Vec<RecoveryAction>,
}

impl ErrorEnvelope {
    pub fn user_message(&self) -> &'static str {
        self.code.user_message()
    }
}

/// Map unclassified failures onto a caller-chosen taxonomy error.
///
/// The original cause is logged and dropped from the caller-facing value.
/// Errors that are already part of the taxonomy pass through untouched.
pub trait TaxonomyResultExt<T> {
    fn or_taxonomy<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> AppError;
}

impl<T, E> TaxonomyResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_taxonomy<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> AppError,
    {
        self.map_err(|e| {
            let error: anyhow::Error = e.into();
            if error.downcast_ref::<AppError>().is_some() {
                return error;
            }
            let mapped = f();
            warn!(
                code = %mapped.code(),
                cause = %format!("{error:#}"),
                "Normalized unclassified error"
            );
            anyhow::Error::new(mapped)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn has_kind(error: &AppError, kind: RecoveryActionKind) -> bool {
        error.recovery_actions().iter().any(|a| a.kind == kind)
    }

    #[rstest]
    #[case(AppError::ai_service("x", false), ErrorCode::AiServiceError, 503, true)]
    #[case(AppError::conversation("x"), ErrorCode::ConversationError, 500, true)]
    #[case(AppError::photo_analysis("x", None), ErrorCode::PhotoAnalysisError, 422, true)]
    #[case(AppError::session_expired("x"), ErrorCode::SessionExpired, 401, false)]
    #[case(AppError::validation("x"), ErrorCode::ValidationError, 400, false)]
    #[case(AppError::database("x"), ErrorCode::DatabaseError, 500, true)]
    #[case(AppError::storage("x"), ErrorCode::StorageError, 500, true)]
    #[case(AppError::not_found("x"), ErrorCode::NotFound, 404, false)]
    #[case(AppError::authentication("x"), ErrorCode::AuthenticationError, 401, false)]
    #[case(AppError::authorization("x"), ErrorCode::AuthorizationError, 403, false)]
    #[case(AppError::internal("x"), ErrorCode::InternalServerError, 500, true)]
    #[case(AppError::service_unavailable("svc", None), ErrorCode::ServiceUnavailable, 503, true)]
    fn test_error_shapes(
        #[case] error: AppError,
        #[case] code: ErrorCode,
        #[case] status: u16,
        #[case] retryable: bool,
    ) {
        assert_eq!(error.code(), code);
        assert_eq!(error.status_code(), status);
        assert_eq!(error.retryable(), retryable);
        assert!(!error.recovery_actions().is_empty());
        if retryable {
            assert!(has_kind(&error, RecoveryActionKind::Retry));
        }
    }

    #[test]
    fn test_photo_analysis_low_confidence_adds_manual_input() {
        let confident = AppError::photo_analysis("blurry", Some(0.9));
        assert_eq!(confident.recovery_actions().len(), 2);

        let unsure = AppError::photo_analysis("blurry", Some(0.5));
        assert_eq!(unsure.recovery_actions().len(), 3);
        assert_eq!(unsure.confidence(), Some(0.5));
        let last = unsure.recovery_actions().last().expect("manual action");
        assert_eq!(last.kind, RecoveryActionKind::Manual);
        assert_eq!(last.label, "Provide input manually");
    }

    #[test]
    fn test_photo_analysis_threshold_is_exclusive() {
        let at_threshold = AppError::photo_analysis("x", Some(LOW_CONFIDENCE_THRESHOLD));
        assert_eq!(at_threshold.recovery_actions().len(), 2);
    }

    #[test]
    fn test_ai_service_conversational_flag() {
        assert!(!has_kind(
            &AppError::ai_service("model timeout", false),
            RecoveryActionKind::Fallback
        ));
        assert!(has_kind(
            &AppError::ai_service("model timeout", true),
            RecoveryActionKind::Fallback
        ));
    }

    #[rstest]
    #[case("Conversation model failed", true)]
    #[case("CHAT completion timed out", true)]
    #[case("vision endpoint returned 500", false)]
    fn test_ai_service_from_message(#[case] message: &str, #[case] fallback: bool) {
        let error = AppError::ai_service_from_message(message);
        assert_eq!(has_kind(&error, RecoveryActionKind::Fallback), fallback);
    }

    #[test]
    fn test_service_unavailable_message_and_hint() {
        let error = AppError::service_unavailable("svc", Some(Duration::from_millis(1500)));
        assert_eq!(error.to_string(), "Service svc is temporarily unavailable");
        assert_eq!(error.retry_after_hint_ms(), Some(1500));

        assert_eq!(ErrorCode::ServiceUnavailable.retry_after_hint_ms(), None);
        assert_eq!(
            AppError::service_unavailable("svc", None).retry_after_hint_ms(),
            None
        );
    }

    #[test]
    fn test_from_anyhow_passes_taxonomy_errors_through() {
        let original = AppError::database("write conflict");
        let normalized = AppError::from_anyhow(anyhow::Error::new(original.clone()));
        assert_eq!(normalized, original);
    }

    #[test]
    fn test_from_anyhow_synthesizes_internal_error() {
        let normalized = AppError::from_anyhow(anyhow::anyhow!("socket closed"));
        assert_eq!(normalized.code(), ErrorCode::InternalServerError);
        assert!(normalized.retryable());
        assert_eq!(normalized.recovery_actions().len(), 1);
        assert_eq!(
            normalized.recovery_actions()[0].kind,
            RecoveryActionKind::Retry
        );
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(AppError::is_retryable_error(&AppError::storage("x").into()));
        assert!(!AppError::is_retryable_error(
            &AppError::validation("x").into()
        ));
        assert!(!AppError::is_retryable_error(&anyhow::anyhow!("plain")));
    }

    #[test]
    fn test_or_taxonomy_maps_only_unclassified_errors() {
        let raw: Result<(), std::io::Error> = Err(std::io::Error::other("connection reset"));
        let mapped = raw
            .or_taxonomy(|| AppError::photo_analysis("Service temporarily unavailable", None))
            .expect_err("should fail");
        let app = mapped.downcast_ref::<AppError>().expect("taxonomy error");
        assert_eq!(app.code(), ErrorCode::PhotoAnalysisError);
        assert!(!app.message().contains("connection reset"));

        let already: anyhow::Result<()> = Err(AppError::validation("bad").into());
        let kept = already
            .or_taxonomy(|| AppError::internal("unused"))
            .expect_err("should fail");
        assert_eq!(
            kept.downcast_ref::<AppError>().map(AppError::code),
            Some(ErrorCode::ValidationError)
        );
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = AppError::service_unavailable("vision", Some(Duration::from_secs(30)))
            .to_envelope(Some("req-1".to_string()));
        let json = serde_json::to_value(&envelope).expect("serialize");

        assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["retryable"], true);
        assert_eq!(json["retryAfter"], 30000);
        assert_eq!(json["recoveryActions"][0]["kind"], "retry");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_envelope_omits_absent_optionals() {
        let envelope = AppError::validation("bad email").to_envelope(None);
        let json = serde_json::to_value(&envelope).expect("serialize");
        assert!(json.get("retryAfter").is_none());
        assert!(json.get("details").is_none());
        assert!(!envelope.request_id.is_empty());
        assert_eq!(
            envelope.user_message(),
            ErrorCode::ValidationError.user_message()
        );
    }
}
