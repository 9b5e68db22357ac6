use crate::reliability::{CircuitBreakerConfig, ConfidenceConfig, RetryConfig};
use crate::session::SessionRecoveryConfig;
use serde::{Deserialize, Serialize};

/// Every tunable of the orchestration layer. Omitted sections and fields
/// deserialize to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub confidence: ConfidenceConfig,
    pub session_recovery: SessionRecoveryConfig,
}
