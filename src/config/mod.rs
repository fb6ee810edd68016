//! Application configuration.
//!
//! Aggregates queue, storage, worker and quarantine settings into a single
//! Config struct that can be loaded from YAML files or environment variables.

mod queue;
mod storage;
mod worker;

pub use queue::{QueueConfig, QueueType, SqsQueueConfig};
pub use storage::{MongoStoreConfig, StorageConfig, StorageType};
pub use worker::{BackoffConfig, BackoffKind, DlqConfig, WorkerConfig};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "GAMELIB_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "GAMELIB";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "GAMELIB_LOG";
/// Environment variable selecting the log output format (`json` or `text`).
pub const LOG_FORMAT_ENV_VAR: &str = "GAMELIB_LOG_FORMAT";

/// SQS caps a single receive at this many messages.
pub const MAX_BATCH_SIZE: u32 = 10;
/// SQS caps long polling at this many seconds.
pub const MAX_WAIT_TIME_SECS: u64 = 20;
/// SQS caps the visibility timeout at twelve hours.
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 43_200;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue the worker consumes.
    pub queue: QueueConfig,
    /// Player library storage.
    pub storage: StorageConfig,
    /// Consumer loop settings.
    pub worker: WorkerConfig,
    /// Poison-message quarantine (disabled unless configured).
    pub dlq: DlqConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    ///
    /// The result is validated before it is returned.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check bounds and backend-specific required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.storage.validate()?;
        self.worker.validate()?;
        self.dlq.validate()?;
        Ok(())
    }

    /// Create config for testing: in-memory queue and store.
    pub fn for_test() -> Self {
        Self {
            queue: QueueConfig {
                queue_type: QueueType::Memory,
                ..Default::default()
            },
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
