//! Kafka broker clients.
//!
//! Producer: `FutureProducer` used in enqueue-only mode. `send` returns once
//! librdkafka has buffered the record; delivery reports are awaited on a
//! detached task and failures are logged.
//!
//! Consumer: `StreamConsumer` per (topic, group) with auto-commit disabled.
//! Offsets are committed explicitly by the consume loop, which seeks back to
//! a record whose handler failed.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, error, info};

use super::{BrokerConsumer, BrokerProducer, BusError, InboundRecord, OutboundRecord, Result};
use crate::config::KafkaConfig;

/// Timeout for flushing buffered records at shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for seeking back to a record whose handler failed.
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings shared by Kafka producers and consumers.
#[derive(Clone, Debug)]
pub struct KafkaBrokerConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl KafkaBrokerConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");

        self.apply_security_config(&mut config);
        config
    }

    fn build_consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");

        self.apply_security_config(&mut config);
        config
    }

    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

impl From<&KafkaConfig> for KafkaBrokerConfig {
    fn from(kafka: &KafkaConfig) -> Self {
        let mut cfg = KafkaBrokerConfig::new(&kafka.bootstrap_servers);

        if let (Some(user), Some(pass), Some(mechanism)) = (
            &kafka.sasl_username,
            &kafka.sasl_password,
            &kafka.sasl_mechanism,
        ) {
            cfg = cfg.with_sasl(user, pass, mechanism);
        }

        if let Some(ref protocol) = kafka.security_protocol {
            cfg = cfg.with_security_protocol(protocol);
        }

        if let Some(ref ca) = kafka.ssl_ca_location {
            cfg = cfg.with_ssl_ca(ca);
        }

        cfg
    }
}

/// Map a client error to the broker taxonomy.
///
/// Coordinator errors are transient: the group is being rebalanced or its
/// coordinator is moving, and a later fetch succeeds without intervention.
pub(crate) fn classify_fetch_error(err: KafkaError) -> BusError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::NotCoordinator
            | RDKafkaErrorCode::CoordinatorNotAvailable
            | RDKafkaErrorCode::CoordinatorLoadInProgress,
        ) => BusError::CoordinatorUnavailable(err.to_string()),
        _ => BusError::Fetch(err.to_string()),
    }
}

/// Kafka producer client.
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(config: &KafkaBrokerConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(bootstrap_servers = %config.bootstrap_servers, "Kafka producer created");

        Ok(Self { producer })
    }
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    async fn send(&self, record: OutboundRecord) -> Result<()> {
        let kafka_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload);

        let delivery = self
            .producer
            .send_result(kafka_record)
            .map_err(|(e, _)| BusError::Send(format!("Failed to enqueue record: {}", e)))?;

        let topic = record.topic.clone();
        let key = record.key.clone();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => debug!(topic = %topic, key = %key, "Record delivered"),
                Ok(Err((e, _))) => {
                    error!(topic = %topic, key = %key, error = %e, "Record delivery failed")
                }
                Err(_) => error!(topic = %topic, key = %key, "Delivery report dropped"),
            }
        });

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| BusError::Flush(format!("Flush task failed: {}", e)))?
            .map_err(|e| BusError::Flush(e.to_string()))
    }
}

/// Kafka consumer bound to one topic and consumer group.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaBrokerConfig, topic: &str, group_id: &str) -> Result<Self> {
        let consumer: StreamConsumer = config
            .build_consumer_config(group_id)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to {}: {}", topic, e)))?;

        info!(topic = %topic, group_id = %group_id, "Subscribed to Kafka topic");

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    async fn fetch(&mut self) -> Result<InboundRecord> {
        let message = self.consumer.recv().await.map_err(classify_fetch_error)?;

        debug!(
            topic = %message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "Fetched record"
        );

        Ok(InboundRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit(&mut self, record: &InboundRecord) -> Result<()> {
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| BusError::Commit(e.to_string()))?;

        self.consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| BusError::Commit(format!("{} (topic {})", e, self.topic)))
    }

    async fn rewind(&mut self, record: &InboundRecord) -> Result<()> {
        self.consumer
            .seek(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| BusError::Rewind(format!("{} (topic {})", e, self.topic)))?;

        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Seeked back to uncommitted record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
