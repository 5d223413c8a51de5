//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod feed;
mod messaging;
mod server;
mod simulator;
mod storage;

pub use feed::FeedConfig;
pub use messaging::{
    KafkaConfig, MessagingConfig, MessagingType, DEFAULT_GROUP_ID, DEFAULT_INGEST_TOPIC,
    DEFAULT_PROCESSED_TOPIC, FEED_GROUP_SUFFIX,
};
pub use server::ServerConfig;
pub use simulator::{SimulatorConfig, DEFAULT_USER_COUNT};
pub use storage::{PostgresConfig, SqliteConfig, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FEEDBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FEEDBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FEEDBUS_LOG";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Broker and topic configuration.
    pub messaging: MessagingConfig,
    /// Message store configuration.
    pub storage: StorageConfig,
    /// Live feed configuration.
    pub feed: FeedConfig,
    /// Message simulator configuration.
    pub simulator: SimulatorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Self = builder
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

    /// Reject settings that cannot drive a timer.
    pub fn validate(&self) -> Result<(), ::config::ConfigError> {
        let zero_intervals = [
            ("simulator.interval_secs", self.simulator.interval_secs),
            ("feed.keep_alive_secs", self.feed.keep_alive_secs),
        ];

        for (key, value) in zero_intervals {
            if value == 0 {
                return Err(::config::ConfigError::Message(format!(
                    "{} must be at least 1",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Create config for testing: in-memory broker and database.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.storage.sqlite.path = ":memory:".to_string();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config
    }
}
