//! In-process broker for standalone mode.
//!
//! Keeps one append-only log per topic and a committed position per
//! (topic, consumer group), mirroring the consumer-group contract of a real
//! broker within a single process. Ideal for local development and testing
//! without external dependencies.
//!
//! Semantics follow Kafka:
//! - every consumer group sees every record of a topic
//! - a new consumer resumes at the group's committed position
//! - committing a record moves the position to `offset + 1`
//! - records fetched but never committed are redelivered to the next consumer
//! - `rewind` moves the consumer's cursor back to a fetched record

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{BrokerConsumer, BrokerProducer, BusError, InboundRecord, OutboundRecord, Result};

/// Stored record in a topic log.
#[derive(Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct TopicLog {
    records: Vec<StoredRecord>,
    /// Committed position per consumer group.
    committed: HashMap<String, i64>,
}

struct BrokerState {
    topics: Mutex<HashMap<String, TopicLog>>,
    /// Bumped on every append so waiting consumers re-check their topic.
    appended: watch::Sender<u64>,
}

impl BrokerState {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory broker shared by producers and consumers of one process.
#[derive(Clone)]
pub struct ChannelBroker {
    state: Arc<BrokerState>,
}

impl ChannelBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);

        info!("Channel broker initialized");

        Self {
            state: Arc::new(BrokerState {
                topics: Mutex::new(HashMap::new()),
                appended,
            }),
        }
    }

    /// Create a producer bound to this broker.
    pub fn producer(&self) -> ChannelProducer {
        ChannelProducer {
            state: Arc::clone(&self.state),
        }
    }

    /// Create a consumer for `topic` resuming at `group_id`'s committed position.
    pub fn consumer(&self, topic: &str, group_id: &str) -> ChannelConsumer {
        let position = {
            let mut topics = self.state.topics();
            let log = topics.entry(topic.to_string()).or_default();
            log.committed.get(group_id).copied().unwrap_or(0)
        };

        debug!(topic = %topic, group_id = %group_id, position, "Channel consumer created");

        ChannelConsumer {
            state: Arc::clone(&self.state),
            appended: self.state.appended.subscribe(),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            cursor: position,
        }
    }

    /// Committed position of `group_id` on `topic`, if it has ever committed.
    pub fn committed_offset(&self, topic: &str, group_id: &str) -> Option<i64> {
        self.state
            .topics()
            .get(topic)
            .and_then(|log| log.committed.get(group_id).copied())
    }

    /// Number of records ever appended to `topic`.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.state
            .topics()
            .get(topic)
            .map(|log| log.records.len())
            .unwrap_or(0)
    }

    /// Append raw bytes to a topic, bypassing envelope encoding.
    ///
    /// Returns the assigned offset.
    pub fn append_raw(&self, topic: &str, key: &str, payload: Vec<u8>) -> i64 {
        append(&self.state, topic, key.to_string(), payload)
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn append(state: &BrokerState, topic: &str, key: String, payload: Vec<u8>) -> i64 {
    let offset = {
        let mut topics = state.topics();
        let log = topics.entry(topic.to_string()).or_default();
        log.records.push(StoredRecord { key, payload });
        (log.records.len() - 1) as i64
    };
    state.appended.send_modify(|version| *version = version.wrapping_add(1));
    offset
}

/// Producer half of the channel broker.
pub struct ChannelProducer {
    state: Arc<BrokerState>,
}

#[async_trait]
impl BrokerProducer for ChannelProducer {
    async fn send(&self, record: OutboundRecord) -> Result<()> {
        let offset = append(&self.state, &record.topic, record.key, record.payload);
        debug!(topic = %record.topic, offset, "Appended record to channel topic");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        // Appends are synchronous; nothing is ever buffered.
        Ok(())
    }
}

/// Consumer half of the channel broker, bound to one topic and group.
pub struct ChannelConsumer {
    state: Arc<BrokerState>,
    appended: watch::Receiver<u64>,
    topic: String,
    group_id: String,
    /// Next offset to hand out. Advances on fetch, independent of commits.
    cursor: i64,
}

impl ChannelConsumer {
    fn try_next(&mut self) -> Option<InboundRecord> {
        let topics = self.state.topics();
        let record = topics
            .get(&self.topic)
            .and_then(|log| log.records.get(self.cursor as usize))?
            .clone();

        let inbound = InboundRecord {
            topic: self.topic.clone(),
            partition: 0,
            offset: self.cursor,
            key: Some(record.key),
            payload: record.payload,
        };
        drop(topics);

        self.cursor += 1;
        Some(inbound)
    }
}

#[async_trait]
impl BrokerConsumer for ChannelConsumer {
    async fn fetch(&mut self) -> Result<InboundRecord> {
        loop {
            if let Some(record) = self.try_next() {
                return Ok(record);
            }

            // The sender lives in `state`, which this consumer keeps alive.
            self.appended
                .changed()
                .await
                .map_err(|e| BusError::Fetch(format!("Channel broker closed: {}", e)))?;
        }
    }

    async fn commit(&mut self, record: &InboundRecord) -> Result<()> {
        let mut topics = self.state.topics();
        let log = topics.entry(self.topic.clone()).or_default();
        let position = log.committed.entry(self.group_id.clone()).or_insert(0);
        *position = (*position).max(record.offset + 1);
        Ok(())
    }

    async fn rewind(&mut self, record: &InboundRecord) -> Result<()> {
        debug!(topic = %self.topic, offset = record.offset, "Rewinding channel consumer");
        self.cursor = record.offset;
        Ok(())
    }
}
