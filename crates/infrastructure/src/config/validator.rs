use super::ConfigError;
use anyhow::{bail, Result};
use orchestrator::{
    CircuitBreakerConfig, ConfidenceConfig, OrchestrationConfig, RetryConfig,
    SessionRecoveryConfig,
};
use tracing::warn;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, config: &OrchestrationConfig) -> Result<()> {
        self.validate_retry_config(&config.retry)?;
        self.validate_circuit_breaker_config(&config.circuit_breaker)?;
        self.validate_confidence_config(&config.confidence)?;
        self.validate_session_recovery_config(&config.session_recovery)?;
        Ok(())
    }

    fn validate_retry_config(&self, config: &RetryConfig) -> Result<()> {
        if config.base_delay_ms == 0 {
            bail!(ConfigError::Invalid {
                field: "retry.base_delay_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if config.max_delay_ms < config.base_delay_ms {
            bail!(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                reason: format!(
                    "{} is less than base_delay_ms {}",
                    config.max_delay_ms, config.base_delay_ms
                ),
            });
        }
        if config.max_retries > 10 {
            warn!(
                "max_retries is {}, a failing call may take a long time to surface",
                config.max_retries
            );
        }
        Ok(())
    }

    fn validate_circuit_breaker_config(&self, config: &CircuitBreakerConfig) -> Result<()> {
        if config.failure_threshold == 0 {
            bail!(ConfigError::Invalid {
                field: "circuit_breaker.failure_threshold",
                reason: "must be greater than 0".to_string(),
            });
        }
        if config.cooldown_ms == 0 {
            warn!("Circuit breaker cooldown is 0, open circuits will probe on every call");
        }
        Ok(())
    }

    fn validate_confidence_config(&self, config: &ConfidenceConfig) -> Result<()> {
        if !(0.0..=1.0).contains(&config.min_confidence) {
            bail!(ConfigError::Invalid {
                field: "confidence.min_confidence",
                reason: format!("must be between 0.0 and 1.0, got {}", config.min_confidence),
            });
        }
        Ok(())
    }

    fn validate_session_recovery_config(&self, config: &SessionRecoveryConfig) -> Result<()> {
        if config.ttl_hours == 0 {
            bail!(ConfigError::Invalid {
                field: "session_recovery.ttl_hours",
                reason: "must be greater than 0".to_string(),
            });
        }
        if config.key_prefix.trim().is_empty() {
            bail!(ConfigError::Invalid {
                field: "session_recovery.key_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_field(config: &OrchestrationConfig) -> Option<&'static str> {
        let error = ConfigValidator::new().validate(config).err()?;
        match error.downcast_ref::<ConfigError>() {
            Some(ConfigError::Invalid { field, .. }) => Some(*field),
            _ => None,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConfigValidator::new()
            .validate(&OrchestrationConfig::default())
            .is_ok());
    }

    #[test]
    fn test_rejects_zero_base_delay() {
        let mut config = OrchestrationConfig::default();
        config.retry.base_delay_ms = 0;
        assert_eq!(invalid_field(&config), Some("retry.base_delay_ms"));
    }

    #[test]
    fn test_rejects_max_delay_below_base() {
        let mut config = OrchestrationConfig::default();
        config.retry.base_delay_ms = 500;
        config.retry.max_delay_ms = 100;
        assert_eq!(invalid_field(&config), Some("retry.max_delay_ms"));
    }

    #[test]
    fn test_rejects_zero_failure_threshold() {
        let mut config = OrchestrationConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert_eq!(invalid_field(&config), Some("circuit_breaker.failure_threshold"));
    }

    #[test]
    fn test_confidence_bounds() {
        let mut config = OrchestrationConfig::default();
        config.confidence.min_confidence = 1.0;
        assert_eq!(invalid_field(&config), None);

        config.confidence.min_confidence = 1.2;
        assert_eq!(invalid_field(&config), Some("confidence.min_confidence"));

        config.confidence.min_confidence = f64::NAN;
        assert_eq!(invalid_field(&config), Some("confidence.min_confidence"));
    }

    #[test]
    fn test_session_recovery_rules() {
        let mut config = OrchestrationConfig::default();
        config.session_recovery.ttl_hours = 0;
        assert_eq!(invalid_field(&config), Some("session_recovery.ttl_hours"));

        config.session_recovery.ttl_hours = 24;
        config.session_recovery.key_prefix = "  ".to_string();
        assert_eq!(invalid_field(&config), Some("session_recovery.key_prefix"));
    }
}
