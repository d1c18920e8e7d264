//! Hierarchical configuration loader.
//!
//! Merge order, lowest to highest precedence: programmatic defaults,
//! `.anvil/config.yaml` (created by `anvil init`), `.anvil/local.yaml`
//! (optional overrides), then `ANVIL_*` environment variables.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrency: {0}. Must be at least 1")]
    InvalidMaxConcurrency(usize),

    #[error("Invalid resource_timeout_secs: {0}. Must be positive")]
    InvalidResourceTimeout(u64),

    #[error("Invalid drift report_buffer: {0}. Must be at least 1")]
    InvalidReportBuffer(usize),

    #[error("Invalid audit max_files: {0}. Must be at least 1")]
    InvalidMaxFiles(usize),

    #[error("Invalid audit max_file_size: {0}. Must be positive")]
    InvalidMaxFileSize(u64),

    #[error("Invalid notification max_tokens: {0}. Must be at least 1")]
    InvalidMaxTokens(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Loader for the engine configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from the project-local `.anvil/`
    /// directory plus the environment.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".anvil/config.yaml"))
            .merge(Yaml::file(".anvil/local.yaml"))
            .merge(Env::prefixed("ANVIL_").split("__"))
            .extract()
            .context("Failed to load configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.executor.max_concurrency == 0 {
            return Err(ConfigError::InvalidMaxConcurrency(
                config.executor.max_concurrency,
            ));
        }
        if config.executor.resource_timeout_secs == 0 {
            return Err(ConfigError::InvalidResourceTimeout(
                config.executor.resource_timeout_secs,
            ));
        }
        if config.drift.report_buffer == 0 {
            return Err(ConfigError::InvalidReportBuffer(config.drift.report_buffer));
        }
        if config.audit.max_files == 0 {
            return Err(ConfigError::InvalidMaxFiles(config.audit.max_files));
        }
        if config.audit.max_file_size == 0 {
            return Err(ConfigError::InvalidMaxFileSize(config.audit.max_file_size));
        }
        if config.notifications.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(config.notifications.max_tokens));
        }
        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
        match config.logging.format.as_str() {
            "json" | "pretty" => {}
            other => return Err(ConfigError::InvalidLogFormat(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ConfigLoader::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.executor.max_concurrency = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrency(0))
        ));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}
