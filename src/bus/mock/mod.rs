//! Mock broker clients for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BrokerConsumer, BrokerProducer, BusError, InboundRecord, OutboundRecord, Result};

/// Mock producer that records every accepted send.
#[derive(Default)]
pub struct MockProducer {
    sent: RwLock<Vec<OutboundRecord>>,
    fail_on_send: RwLock<bool>,
    flush_count: RwLock<usize>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        *self.fail_on_send.write().await = fail;
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    pub async fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.read().await.clone()
    }

    pub async fn flush_count(&self) -> usize {
        *self.flush_count.read().await
    }
}

#[async_trait]
impl BrokerProducer for MockProducer {
    async fn send(&self, record: OutboundRecord) -> Result<()> {
        if *self.fail_on_send.read().await {
            return Err(BusError::Send("Mock send failure".to_string()));
        }
        self.sent.write().await.push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        *self.flush_count.write().await += 1;
        Ok(())
    }
}

/// Mock consumer that replays a fixed script of fetch results.
///
/// Once the script is exhausted `fetch` pends forever, so a consume loop
/// driving it idles until cancelled.
///
/// `rewind` pushes the record back to the front of the script.
pub struct MockConsumer {
    script: VecDeque<Result<InboundRecord>>,
    commits: Arc<Mutex<Vec<i64>>>,
    rewinds: Arc<Mutex<Vec<i64>>>,
    failing_rewinds: usize,
}

impl MockConsumer {
    pub fn new(script: impl IntoIterator<Item = Result<InboundRecord>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            commits: Arc::new(Mutex::new(Vec::new())),
            rewinds: Arc::new(Mutex::new(Vec::new())),
            failing_rewinds: 0,
        }
    }

    /// Fail the next `count` rewinds.
    pub fn with_failing_rewinds(mut self, count: usize) -> Self {
        self.failing_rewinds = count;
        self
    }

    /// Shared log of committed offsets, readable after the consumer moves into a loop.
    pub fn commits(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.commits)
    }

    /// Shared log of offsets the consumer was rewound to.
    pub fn rewinds(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.rewinds)
    }
}

#[async_trait]
impl BrokerConsumer for MockConsumer {
    async fn fetch(&mut self) -> Result<InboundRecord> {
        match self.script.pop_front() {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn commit(&mut self, record: &InboundRecord) -> Result<()> {
        self.commits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.offset);
        Ok(())
    }

    async fn rewind(&mut self, record: &InboundRecord) -> Result<()> {
        if self.failing_rewinds > 0 {
            self.failing_rewinds -= 1;
            return Err(BusError::Rewind("Mock rewind failure".to_string()));
        }
        self.rewinds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.offset);
        self.script.push_front(Ok(record.clone()));
        Ok(())
    }
}
