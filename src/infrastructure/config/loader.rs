use anyhow::{Context, Result};
use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use super::ForestConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid vector provider: {0}. Must be one of: sqlitevec, memory")]
    InvalidVectorProvider(String),

    #[error("Invalid expansion interval: {0}ms. Must be at least 1000")]
    InvalidExpansionInterval(u64),

    #[error("Invalid min_tasks: {0}. Must be at least 1")]
    InvalidMinTasks(usize),

    #[error("Invalid llm timeout: {0}ms. Must be positive")]
    InvalidLlmTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid environment value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. forest.yaml in the working directory (optional)
    /// 3. Recognized environment keys (highest priority)
    pub fn load() -> Result<ForestConfig> {
        let mut config: ForestConfig = Figment::new()
            .merge(Serialized::defaults(ForestConfig::default()))
            .merge(Yaml::file("forest.yaml"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::apply_env(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring the
    /// environment keys.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<ForestConfig> {
        let mut config: ForestConfig = Figment::new()
            .merge(Serialized::defaults(ForestConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::apply_env(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Overlay the recognized environment keys. Each key controls exactly
    /// one effect.
    fn apply_env(config: &mut ForestConfig) -> Result<(), ConfigError> {
        if let Ok(dir) = std::env::var("FOREST_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = dir.into();
            }
        }
        if let Ok(provider) = std::env::var("FOREST_VECTOR_PROVIDER") {
            if !provider.is_empty() {
                config.vector_provider = provider;
            }
        }
        if let Some(interval) = Self::env_u64("HTA_EXPANSION_INTERVAL_MS")? {
            config.expansion.interval_ms = interval;
        }
        if let Some(min_tasks) = Self::env_u64("HTA_EXPANSION_MIN_TASKS")? {
            config.expansion.min_tasks = usize::try_from(min_tasks).unwrap_or(usize::MAX);
        }
        if let Some(debug) = Self::env_bool("HTA_EXPANSION_DEBUG")? {
            config.expansion.debug = debug;
        }
        if let Some(timeout) = Self::env_u64("LLM_TIMEOUT")? {
            config.llm_timeout_ms = timeout;
        }
        if let Some(read_only) = Self::env_bool("STAGE1_READ_ONLY")? {
            config.read_only = read_only;
        }
        Ok(())
    }

    fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
        match std::env::var(key) {
            Ok(raw) if !raw.is_empty() => {
                raw.parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidEnvValue {
                        key: key.to_string(),
                        value: raw,
                    })
            }
            _ => Ok(None),
        }
    }

    fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
        match std::env::var(key) {
            Ok(raw) if !raw.is_empty() => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::InvalidEnvValue {
                    key: key.to_string(),
                    value: raw,
                }),
            },
            _ => Ok(None),
        }
    }

    /// Validate configuration after loading
    pub fn validate(config: &ForestConfig) -> Result<(), ConfigError> {
        let valid_providers = ["sqlitevec", "memory"];
        if !valid_providers.contains(&config.vector_provider.as_str()) {
            return Err(ConfigError::InvalidVectorProvider(
                config.vector_provider.clone(),
            ));
        }

        if config.expansion.interval_ms < 1000 {
            return Err(ConfigError::InvalidExpansionInterval(
                config.expansion.interval_ms,
            ));
        }

        if config.expansion.min_tasks == 0 {
            return Err(ConfigError::InvalidMinTasks(config.expansion.min_tasks));
        }

        if config.llm_timeout_ms == 0 {
            return Err(ConfigError::InvalidLlmTimeout(config.llm_timeout_ms));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
