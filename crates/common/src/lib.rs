//! Shared building blocks for the orchestration workspace: the error taxonomy
//! every component reports through, and logging setup.

pub mod errors;
pub mod structured_logging;

pub use errors::{
    AppError, ErrorCode, ErrorEnvelope, RecoveryAction, RecoveryActionKind,
    TaxonomyResultExt, LOW_CONFIDENCE_THRESHOLD,
};

pub use structured_logging::{
    init_structured_logging, JsonFormatter, LoggingConfig, OperationTimer, StructuredLogEntry,
};
