use super::{ConfigError, ConfigValidator};
use anyhow::{Context, Result};
use orchestrator::OrchestrationConfig;
use serde::de::DeserializeOwned;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Default,
}

pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_paths: Self::default_config_paths(),
            env_prefix: "RESILIENCE_".to_string(),
        }
    }

    /// Search `path` before the default locations.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.config_paths.insert(0, path);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("resilience.toml"),
            PathBuf::from(".resiliencerc.toml"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("resilience").join("config.toml"));
        }

        paths
    }

    pub async fn load(&self) -> Result<OrchestrationConfig> {
        Ok(self.load_with_source().await?.0)
    }

    /// Load the first readable config file (or defaults), then apply
    /// environment overrides.
    pub async fn load_with_source(&self) -> Result<(OrchestrationConfig, ConfigSource)> {
        let mut config = OrchestrationConfig::default();
        let mut source = ConfigSource::Default;

        for path in &self.config_paths {
            if !path.exists() {
                continue;
            }
            match self.load_file(path).await {
                Ok(file_config) => {
                    info!("Loaded configuration from: {}", path.display());
                    config = file_config;
                    source = ConfigSource::File(path.clone());
                    break; // First readable file wins
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {:#}", path.display(), e);
                }
            }
        }

        if source == ConfigSource::Default {
            debug!("No config file found, using defaults");
        }

        Ok((self.apply_env_overrides(config), source))
    }

    /// Load, then reject configurations the orchestration layer cannot run
    /// with.
    pub async fn load_validated(&self) -> Result<OrchestrationConfig> {
        let config = self.load().await?;
        ConfigValidator::new()
            .validate(&config)
            .context("Configuration failed validation")?;
        Ok(config)
    }

    pub async fn load_file(&self, path: &Path) -> Result<OrchestrationConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        parse_by_extension(path, &content)
    }

    fn apply_env_overrides(&self, mut config: OrchestrationConfig) -> OrchestrationConfig {
        if let Some(v) = self.env_value("MAX_RETRIES") {
            config.retry.max_retries = v;
        }
        if let Some(v) = self.env_value("BASE_DELAY_MS") {
            config.retry.base_delay_ms = v;
        }
        if let Some(v) = self.env_value("MAX_DELAY_MS") {
            config.retry.max_delay_ms = v;
        }
        if let Some(v) = self.env_value("FAILURE_THRESHOLD") {
            config.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = self.env_value("COOLDOWN_MS") {
            config.circuit_breaker.cooldown_ms = v;
        }
        if let Some(v) = self.env_value("MIN_CONFIDENCE") {
            config.confidence.min_confidence = v;
        }
        if let Some(v) = self.env_value("SESSION_TTL_HOURS") {
            config.session_recovery.ttl_hours = v;
        }
        config
    }

    /// Unparseable values are logged and ignored.
    fn env_value<T: FromStr>(&self, name: &str) -> Option<T> {
        let var = format!("{}{}", self.env_prefix, name);
        let raw = env::var(&var).ok()?;
        match raw.trim().parse() {
            Ok(value) => {
                debug!("Applied environment override {}", var);
                Some(value)
            }
            Err(_) => {
                warn!("Ignoring unparseable environment override {}={}", var, raw);
                None
            }
        }
    }

    pub async fn save_config(&self, config: &OrchestrationConfig, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("toml");

        let content = match extension {
            "json" => serde_json::to_string_pretty(config)?,
            _ => toml::to_string_pretty(config)?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(path, content).await?;
        info!("Configuration saved to: {}", path.display());

        Ok(())
    }

    /// Default configuration rendered as TOML.
    pub fn generate_example_config() -> Result<String> {
        toml::to_string_pretty(&OrchestrationConfig::default())
            .context("Failed to render example configuration")
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_by_extension<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let parsed = match extension {
        "json" => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        _ => toml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
    };
    Ok(parsed)
}
