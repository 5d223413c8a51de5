//! Messaging and broker configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Default topic receiving newly ingested messages.
pub const DEFAULT_INGEST_TOPIC: &str = "events-to-process";
/// Default topic receiving persisted messages.
pub const DEFAULT_PROCESSED_TOPIC: &str = "events-processed";
/// Default consumer group of the persist-and-republish worker.
pub const DEFAULT_GROUP_ID: &str = "message-group";
/// Suffix appended to the group id for the feed bridge consumer.
pub const FEED_GROUP_SUFFIX: &str = "-feed";

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broker (no external dependencies).
    #[default]
    Channel,
    /// Kafka cluster.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Topic the HTTP ingest endpoint publishes to.
    pub ingest_topic: String,
    /// Topic the worker republishes persisted messages to.
    pub processed_topic: String,
    /// Consumer group of the worker. The feed bridge uses `<group_id>-feed`.
    pub group_id: String,
    /// Wait before retrying after a coordinator error.
    pub coordinator_backoff_ms: u64,
    /// Wait before refetching a record whose handler failed.
    pub retry_backoff_ms: u64,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

impl MessagingConfig {
    /// Consumer group of the feed bridge.
    pub fn feed_group_id(&self) -> String {
        format!("{}{}", self.group_id, FEED_GROUP_SUFFIX)
    }

    pub fn coordinator_backoff(&self) -> Duration {
        Duration::from_millis(self.coordinator_backoff_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: MessagingType::Channel,
            ingest_topic: DEFAULT_INGEST_TOPIC.to_string(),
            processed_topic: DEFAULT_PROCESSED_TOPIC.to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            coordinator_backoff_ms: 3000,
            retry_backoff_ms: 1000,
            kafka: KafkaConfig::default(),
        }
    }
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// SASL username.
    pub sasl_username: Option<String>,
    /// SASL password.
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path.
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_config_default() {
        let config = MessagingConfig::default();
        assert_eq!(config.messaging_type, MessagingType::Channel);
        assert_eq!(config.ingest_topic, "events-to-process");
        assert_eq!(config.processed_topic, "events-processed");
        assert_eq!(config.coordinator_backoff(), Duration::from_secs(3));
        assert_eq!(config.retry_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_feed_group_is_distinct_from_worker_group() {
        let config = MessagingConfig {
            group_id: "g".to_string(),
            ..Default::default()
        };
        assert_eq!(config.feed_group_id(), "g-feed");
    }
}
