//! Server configuration.

mod loader;

pub use loader::{ConfigError, ConfigLoader};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Background expansion agent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Supervisor tick period in milliseconds.
    pub interval_ms: u64,
    /// Refill the frontier when fewer eligible tasks remain.
    pub min_tasks: usize,
    /// Verbose expansion logging.
    pub debug: bool,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 300_000,
            min_tasks: 3,
            debug: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Data root for the JSON store and the vector index file.
    pub data_dir: PathBuf,
    /// Vector backend: "sqlitevec" (default) or "memory".
    pub vector_provider: String,
    pub expansion: ExpansionConfig,
    /// Intelligence Bridge deadline in milliseconds.
    pub llm_timeout_ms: u64,
    /// Disables all mutation paths.
    pub read_only: bool,
    pub logging: LoggingConfig,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".forest-data"),
            vector_provider: "sqlitevec".to_string(),
            expansion: ExpansionConfig::default(),
            llm_timeout_ms: 30_000,
            read_only: false,
            logging: LoggingConfig::default(),
        }
    }
}
