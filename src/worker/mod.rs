//! Persist-and-republish worker.
//!
//! Consumes the ingest topic, saves each message, then republishes it to the
//! processed topic. A message appears on the processed topic only after it
//! has been stored. When either step fails the record stays uncommitted and
//! the consume loop retries it before moving on; the repeated save is a no-op
//! by id.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::Publisher;
use crate::consumer::{ConsumeLoop, ConsumeStats, EnvelopeHandler, HandlerError};
use crate::envelope::{Envelope, Eventable};
use crate::message::Message;
use crate::storage::MessageStore;

/// Handler that stores a message and then republishes it.
pub struct PersistAndRepublish {
    store: Arc<dyn MessageStore>,
    publisher: Arc<Publisher<Message>>,
    processed_topic: String,
}

impl PersistAndRepublish {
    pub fn new(
        store: Arc<dyn MessageStore>,
        publisher: Arc<Publisher<Message>>,
        processed_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            processed_topic: processed_topic.into(),
        }
    }
}

impl EnvelopeHandler<Message> for PersistAndRepublish {
    fn handle(&self, envelope: Arc<Envelope<Message>>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let store = Arc::clone(&self.store);
        let publisher = Arc::clone(&self.publisher);
        let topic = self.processed_topic.clone();

        Box::pin(async move {
            let message = envelope.payload();

            store.save(message).await?;
            debug!(message_id = %message.id, "Message persisted");

            publisher.publish(&topic, message.clone()).await?;
            debug!(message_id = %message.id, topic = %topic, "Message republished");

            Ok(())
        })
    }
}

/// Runs a consume loop as a background task.
///
/// `start` spawns and returns immediately; `stop` waits for the task to
/// finish. Cancel the token passed to `start` before calling `stop`.
pub struct Worker<T> {
    name: String,
    consume_loop: Option<ConsumeLoop<T>>,
    stats: Arc<ConsumeStats>,
    task: Option<JoinHandle<()>>,
}

impl<T: Eventable> Worker<T> {
    pub fn new(name: impl Into<String>, consume_loop: ConsumeLoop<T>) -> Self {
        Self {
            name: name.into(),
            stats: consume_loop.stats(),
            consume_loop: Some(consume_loop),
            task: None,
        }
    }

    pub fn stats(&self) -> Arc<ConsumeStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the consume loop. A second call does nothing.
    pub fn start(&mut self, cancel: CancellationToken) {
        match self.consume_loop.take() {
            Some(consume_loop) => {
                info!(worker = %self.name, "Starting worker");
                self.task = Some(tokio::spawn(consume_loop.run(cancel)));
            }
            None => debug!(worker = %self.name, "Worker already started"),
        }
    }

    /// Wait for the consume loop task to exit.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(worker = %self.name, error = %e, "Worker task failed");
            }
            info!(worker = %self.name, "Worker stopped");
        }
    }
}
