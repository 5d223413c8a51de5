//! Envelope-wrapping publisher.
//!
//! Publishing is fire-and-forget: `publish` returns once the record has been
//! accepted by the local producer client. Callers that need broker-side
//! durability must not rely on a successful return alone.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::{BrokerProducer, BusError, OutboundRecord};
use crate::envelope::{Envelope, EnvelopeError, Eventable};

/// Errors returned by [`Publisher`].
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("Failed to send: {0}")]
    Send(#[from] BusError),

    #[error("Publisher is closed")]
    Closed,
}

/// Publishes payloads of type `T` wrapped in fresh envelopes.
pub struct Publisher<T> {
    producer: Arc<dyn BrokerProducer>,
    closed: AtomicBool,
    _payload: PhantomData<fn(T)>,
}

impl<T: Eventable> Publisher<T> {
    pub fn new(producer: Arc<dyn BrokerProducer>) -> Self {
        Self {
            producer,
            closed: AtomicBool::new(false),
            _payload: PhantomData,
        }
    }

    /// Wrap `payload` in a new envelope and send it to `topic`, keyed by the
    /// envelope id.
    #[tracing::instrument(name = "publisher.publish", skip_all, fields(topic = %topic))]
    pub async fn publish(&self, topic: &str, payload: T) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }

        let envelope = Envelope::wrap(payload);
        let record = OutboundRecord {
            topic: topic.to_string(),
            key: envelope.id().to_string(),
            payload: envelope.to_bytes()?,
        };

        self.producer.send(record).await?;

        debug!(envelope_id = %envelope.id(), kind = %envelope.kind(), "Published envelope");
        Ok(())
    }

    /// Flush buffered sends and stop accepting new ones.
    ///
    /// Only the first call flushes; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), PublishError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(kind = T::KIND, "Closing publisher");
        self.producer.flush().await?;
        Ok(())
    }
}
