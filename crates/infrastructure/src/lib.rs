//! Configuration loading and validation for the orchestration layer.

pub mod config;

pub use config::{ConfigError, ConfigLoader, ConfigSource, ConfigValidator};
