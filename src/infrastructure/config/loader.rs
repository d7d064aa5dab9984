//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid poll interval: {0}. Must be at least 1 second")]
    InvalidPollInterval(u64),

    #[error("invalid monitor interval: {0}. Must be at least 1 second")]
    InvalidMonitorInterval(u64),

    #[error("invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence, lowest to highest:
    /// 1. Programmatic defaults
    /// 2. `dramatis.yaml` (project config)
    /// 3. `dramatis.local.yaml` (local overrides, optional)
    /// 4. `DRAMATIS_*` environment variables, nested keys split on `__`
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("dramatis.yaml"))
            .merge(Yaml::file("dramatis.local.yaml"))
            .merge(Env::prefixed("DRAMATIS_").split("__"))
            .extract()
            .context("failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a single file plus defaults.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.worker.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval(
                config.worker.poll_interval_secs,
            ));
        }
        if config.queue.monitor_interval_secs == 0 {
            return Err(ConfigError::InvalidMonitorInterval(
                config.queue.monitor_interval_secs,
            ));
        }
        if config.queue.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.queue.max_retries));
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
