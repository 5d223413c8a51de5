//! Broker access for the two-hop pipeline.
//!
//! This module contains:
//! - `BrokerProducer` / `BrokerConsumer` traits: the narrow broker contract
//!   (keyed send, consumer-group fetch, explicit commit)
//! - `Publisher`: envelope-wrapping, fire-and-forget publish on top of a producer
//! - `Broker`: factory selecting the backend from configuration
//! - Implementations: in-process channel broker, Kafka, Mock

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

// Implementation modules
pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;
pub mod publisher;

// Re-exports
pub use channel::{ChannelBroker, ChannelConsumer, ChannelProducer};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBrokerConfig, KafkaConsumer, KafkaProducer};
pub use mock::{MockConsumer, MockProducer};
pub use publisher::{PublishError, Publisher};

// ============================================================================
// Errors
// ============================================================================

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur while talking to the broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Rewind failed: {0}")]
    Rewind(String),

    /// Group coordinator unavailable or moving. Retrying after a pause succeeds
    /// once the broker settles.
    #[error("Group coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),

    #[error("Flush failed: {0}")]
    Flush(String),
}

impl BusError {
    /// Returns true for fetch errors that warrant a fixed backoff before retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CoordinatorUnavailable(_))
    }
}

// ============================================================================
// Records
// ============================================================================

/// A record handed to the broker for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    /// Partitioning key. Same key, same partition.
    pub key: String,
    pub payload: Vec<u8>,
}

/// A record fetched from the broker under a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

// ============================================================================
// Traits
// ============================================================================

/// Sending half of the broker contract.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Enqueue a record for delivery.
    ///
    /// Returns once the local client has accepted the record. Broker-side
    /// durability is not confirmed by a successful return.
    async fn send(&self, record: OutboundRecord) -> Result<()>;

    /// Flush buffered records.
    async fn flush(&self) -> Result<()>;
}

/// Receiving half of the broker contract.
///
/// A consumer is bound to one topic and one consumer group and is owned by a
/// single consume loop.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Wait for the next record.
    ///
    /// Must be safe to drop mid-await; the consume loop races it against
    /// cancellation.
    async fn fetch(&mut self) -> Result<InboundRecord>;

    /// Advance the group position past `record`.
    async fn commit(&mut self, record: &InboundRecord) -> Result<()>;

    /// Move this consumer back so the next `fetch` returns `record` again.
    ///
    /// Records after it are redelivered too; nothing past an uncommitted
    /// record may be committed first.
    async fn rewind(&mut self, record: &InboundRecord) -> Result<()>;
}

// ============================================================================
// Factory
// ============================================================================

/// Configured broker backend.
///
/// Hands out producers and consumers for the selected messaging type:
/// - Channel: in-process broker (always available)
/// - Kafka: `--features kafka`
#[derive(Clone)]
pub enum Broker {
    Channel(ChannelBroker),
    #[cfg(feature = "kafka")]
    Kafka(KafkaBrokerConfig),
}

impl Broker {
    /// Select the backend described by `config`.
    pub fn from_config(config: &MessagingConfig) -> Result<Self> {
        match config.messaging_type {
            MessagingType::Channel => {
                info!(messaging_type = "channel", "Broker initialized");
                Ok(Self::Channel(ChannelBroker::new()))
            }
            MessagingType::Kafka => {
                #[cfg(feature = "kafka")]
                {
                    info!(
                        messaging_type = "kafka",
                        bootstrap_servers = %config.kafka.bootstrap_servers,
                        "Broker initialized"
                    );
                    Ok(Self::Kafka(KafkaBrokerConfig::from(&config.kafka)))
                }

                #[cfg(not(feature = "kafka"))]
                {
                    Err(BusError::Connection(
                        "Kafka support requires the 'kafka' feature. Rebuild with --features kafka"
                            .to_string(),
                    ))
                }
            }
        }
    }

    /// Create a producer client.
    pub fn producer(&self) -> Result<Arc<dyn BrokerProducer>> {
        match self {
            Self::Channel(broker) => Ok(Arc::new(broker.producer())),
            #[cfg(feature = "kafka")]
            Self::Kafka(config) => Ok(Arc::new(KafkaProducer::new(config)?)),
        }
    }

    /// Create a consumer for `topic` under `group_id`.
    pub fn consumer(&self, topic: &str, group_id: &str) -> Result<Box<dyn BrokerConsumer>> {
        match self {
            Self::Channel(broker) => Ok(Box::new(broker.consumer(topic, group_id))),
            #[cfg(feature = "kafka")]
            Self::Kafka(config) => Ok(Box::new(KafkaConsumer::new(config, topic, group_id)?)),
        }
    }
}
