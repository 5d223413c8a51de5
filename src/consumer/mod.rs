//! Consume loop: fetch, decode, handle, commit.
//!
//! One loop owns one broker consumer. Each record goes through:
//!
//! ```text
//! fetch -> decode -> handle -> commit
//!            |          |
//!            |          +-- failure: no commit; the consumer is rewound to
//!            |              the record, which is fetched again after the
//!            |              retry backoff
//!            +-- poison: logged and committed so it is never retried
//! ```
//!
//! A failed record blocks the records behind it until its handler succeeds,
//! so the committed position never passes it.
//!
//! Fetch errors never end the loop. Coordinator errors wait a fixed backoff
//! before the next fetch; anything else retries immediately. Only
//! cancellation stops the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BrokerConsumer, BusError, InboundRecord, PublishError};
use crate::envelope::{Envelope, EnvelopeError, Eventable};
use crate::storage::StorageError;

/// Default wait after a coordinator error.
pub const DEFAULT_COORDINATOR_BACKOFF: Duration = Duration::from_secs(3);

/// Default wait before refetching a record whose handler failed.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Errors a handler can report. Any error leaves the record uncommitted.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Persist failed: {0}")]
    Persist(#[from] StorageError),

    #[error("Republish failed: {0}")]
    Republish(#[from] PublishError),

    #[error("{0}")]
    Other(String),
}

/// Processes one decoded envelope.
pub trait EnvelopeHandler<T>: Send + Sync {
    fn handle(&self, envelope: Arc<Envelope<T>>) -> BoxFuture<'static, Result<(), HandlerError>>;
}

/// Counters describing what a consume loop has done so far.
#[derive(Debug, Default)]
pub struct ConsumeStats {
    processed: AtomicU64,
    poison: AtomicU64,
    handler_failures: AtomicU64,
    fetch_errors: AtomicU64,
}

impl ConsumeStats {
    /// Records handled successfully and committed.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Undecodable records skipped.
    pub fn poison(&self) -> u64 {
        self.poison.load(Ordering::Relaxed)
    }

    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }
}

/// Outcome of one fetched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Handled,
    Poison,
    HandlerFailed,
}

/// Fetch-decode-handle-commit cycle over one consumer.
pub struct ConsumeLoop<T> {
    name: String,
    consumer: Box<dyn BrokerConsumer>,
    handler: Arc<dyn EnvelopeHandler<T>>,
    coordinator_backoff: Duration,
    retry_backoff: Duration,
    stats: Arc<ConsumeStats>,
}

impl<T: Eventable> ConsumeLoop<T> {
    pub fn new(
        name: impl Into<String>,
        consumer: Box<dyn BrokerConsumer>,
        handler: Arc<dyn EnvelopeHandler<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            consumer,
            handler,
            coordinator_backoff: DEFAULT_COORDINATOR_BACKOFF,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            stats: Arc::new(ConsumeStats::default()),
        }
    }

    pub fn with_coordinator_backoff(mut self, backoff: Duration) -> Self {
        self.coordinator_backoff = backoff;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Shared counters; remain readable after `run` consumes the loop.
    pub fn stats(&self) -> Arc<ConsumeStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires.
    #[tracing::instrument(name = "consume_loop", skip_all, fields(loop_name = %self.name))]
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Consume loop started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.consumer.fetch() => fetched,
            };

            match fetched {
                Ok(record) => {
                    let step = self.process(&record).await;
                    debug!(offset = record.offset, step = ?step, "Record done");
                    if step == Step::HandlerFailed && !self.retry_later(&record, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    self.stats.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    if !self.on_fetch_error(e, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!(
            processed = self.stats.processed(),
            poison = self.stats.poison(),
            handler_failures = self.stats.handler_failures(),
            "Consume loop stopped"
        );
    }

    /// Returns false if cancellation fired while backing off.
    async fn on_fetch_error(&self, err: BusError, cancel: &CancellationToken) -> bool {
        if err.is_transient() {
            warn!(
                error = %err,
                backoff_ms = self.coordinator_backoff.as_millis() as u64,
                "Coordinator unavailable, backing off"
            );
            return self.wait(self.coordinator_backoff, cancel).await;
        }

        error!(error = %err, "Fetch failed");
        tokio::task::yield_now().await;
        true
    }

    /// Wait the retry backoff, then rewind so the next fetch returns `record`.
    ///
    /// A failed rewind is retried; fetching on would let a later commit pass
    /// the record. Returns false if cancellation fired.
    async fn retry_later(&mut self, record: &InboundRecord, cancel: &CancellationToken) -> bool {
        loop {
            if !self.wait(self.retry_backoff, cancel).await {
                return false;
            }
            match self.consumer.rewind(record).await {
                Ok(()) => return true,
                Err(e) => error!(offset = record.offset, error = %e, "Failed to rewind consumer"),
            }
        }
    }

    /// Sleep for `backoff`. Returns false if cancellation fired first.
    async fn wait(&self, backoff: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(backoff) => true,
        }
    }

    async fn process(&mut self, record: &InboundRecord) -> Step {
        let envelope = match Envelope::<T>::from_bytes(&record.payload) {
            Ok(envelope) => Arc::new(envelope),
            Err(e) => {
                self.log_poison(record, &e);
                self.stats.poison.fetch_add(1, Ordering::Relaxed);
                self.commit(record).await;
                return Step::Poison;
            }
        };

        match self.handler.handle(Arc::clone(&envelope)).await {
            Ok(()) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                self.commit(record).await;
                Step::Handled
            }
            Err(e) => {
                error!(
                    envelope_id = %envelope.id(),
                    offset = record.offset,
                    error = %e,
                    retry_ms = self.retry_backoff.as_millis() as u64,
                    "Handler failed, leaving record uncommitted"
                );
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                Step::HandlerFailed
            }
        }
    }

    fn log_poison(&self, record: &InboundRecord, err: &EnvelopeError) {
        match err {
            EnvelopeError::Payload { id, kind, version, .. } => warn!(
                envelope_id = %id,
                kind = %kind,
                version = %version,
                offset = record.offset,
                error = %err,
                "Skipping envelope with undecodable payload"
            ),
            EnvelopeError::KindMismatch { id, found, .. } => warn!(
                envelope_id = %id,
                kind = %found,
                offset = record.offset,
                error = %err,
                "Skipping envelope of unexpected kind"
            ),
            _ => warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                bytes = record.payload.len(),
                error = %err,
                "Skipping malformed record"
            ),
        }
    }

    async fn commit(&mut self, record: &InboundRecord) {
        if let Err(e) = self.consumer.commit(record).await {
            error!(offset = record.offset, error = %e, "Failed to commit offset");
        }
    }
}

#[cfg(test)]
mod tests;
