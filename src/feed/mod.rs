//! Live feed: processed topic to broadcaster, broadcaster to viewers.
//!
//! The bridge runs a consume loop on the processed topic and hands every
//! event to the [`Broadcaster`]. A viewer opened with [`open_feed`] gets the
//! stored history first, oldest first, then live events until it disconnects
//! or the service shuts down.
//!
//! The viewer registers before loading history, so a message persisted in
//! between can arrive both ways. Live events whose message id was already
//! sent as history are skipped. The processed topic carries messages in the
//! order they were stored, so once a live event that is not in the history
//! arrives, no later one can be, and the history ids are released.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::broadcast::{Broadcaster, SubscriberId};
use crate::bus::BrokerConsumer;
use crate::consumer::{ConsumeLoop, ConsumeStats, EnvelopeHandler, HandlerError};
use crate::envelope::Envelope;
use crate::message::Message;
use crate::storage::MessageStore;
use crate::worker::Worker;

/// Handler that pushes every processed event into the broadcaster.
///
/// Always succeeds, so the bridge commits each event once it is offered to
/// subscribers, whether or not any queue accepted it.
pub struct BroadcastHandler {
    broadcaster: Arc<Broadcaster<Message>>,
}

impl BroadcastHandler {
    pub fn new(broadcaster: Arc<Broadcaster<Message>>) -> Self {
        Self { broadcaster }
    }
}

impl EnvelopeHandler<Message> for BroadcastHandler {
    fn handle(&self, envelope: Arc<Envelope<Message>>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let delivered = self.broadcaster.broadcast(Arc::clone(&envelope));
        debug!(envelope_id = %envelope.id(), delivered, "Event broadcast");
        Box::pin(async { Ok(()) })
    }
}

/// Consume loop feeding the broadcaster, with the worker lifecycle.
pub struct FeedBridge {
    worker: Worker<Message>,
}

impl FeedBridge {
    pub fn new(
        consumer: Box<dyn BrokerConsumer>,
        broadcaster: Arc<Broadcaster<Message>>,
        coordinator_backoff: Duration,
    ) -> Self {
        let consume_loop = ConsumeLoop::<Message>::new(
            "feed-bridge",
            consumer,
            Arc::new(BroadcastHandler::new(broadcaster)),
        )
        .with_coordinator_backoff(coordinator_backoff);

        Self {
            worker: Worker::new("feed-bridge", consume_loop),
        }
    }

    pub fn start(&mut self, cancel: CancellationToken) {
        self.worker.start(cancel);
    }

    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }

    pub fn stats(&self) -> Arc<ConsumeStats> {
        self.worker.stats()
    }
}

/// Unregisters a feed's queue when dropped.
struct FeedRegistration {
    broadcaster: Arc<Broadcaster<Message>>,
    id: SubscriberId,
}

impl Drop for FeedRegistration {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.id);
    }
}

struct FeedState {
    receiver: mpsc::Receiver<Arc<Envelope<Message>>>,
    _registration: FeedRegistration,
    cancel: CancellationToken,
    store: Option<Arc<dyn MessageStore>>,
    history: VecDeque<Message>,
    filter: HistoryFilter,
}

/// Drops live events that repeat history already sent on the same feed.
#[derive(Debug, Default)]
struct HistoryFilter {
    /// Ids sent as history and not yet seen live; `None` once released.
    pending: Option<HashSet<String>>,
}

impl HistoryFilter {
    fn sent_as_history(&mut self, id: &str) {
        self.pending
            .get_or_insert_with(HashSet::new)
            .insert(id.to_string());
    }

    /// Whether a live event with this message id should be forwarded.
    fn admit(&mut self, id: &str) -> bool {
        match self.pending.as_mut().map(|pending| pending.remove(id)) {
            Some(true) => false,
            Some(false) => {
                debug!("Live stream caught up with history, releasing history ids");
                self.pending = None;
                true
            }
            None => true,
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.pending.as_ref().map_or(0, HashSet::len)
    }
}

/// Open one viewer's feed: stored history, then live events.
///
/// The queue is registered before this returns. The stream ends when
/// `cancel` fires or the queue is closed; dropping it releases the queue.
pub fn open_feed(
    broadcaster: Arc<Broadcaster<Message>>,
    store: Arc<dyn MessageStore>,
    cancel: CancellationToken,
) -> BoxStream<'static, Arc<Envelope<Message>>> {
    let subscription = broadcaster.register();
    let state = FeedState {
        receiver: subscription.receiver,
        _registration: FeedRegistration {
            broadcaster,
            id: subscription.id,
        },
        cancel,
        store: Some(store),
        history: VecDeque::new(),
        filter: HistoryFilter::default(),
    };

    stream::unfold(state, |mut state| async move {
        if state.cancel.is_cancelled() {
            return None;
        }

        if let Some(store) = state.store.take() {
            state.history = load_history(store.as_ref()).await;
        }

        if let Some(message) = state.history.pop_front() {
            state.filter.sent_as_history(&message.id);
            return Some((Arc::new(Envelope::wrap(message)), state));
        }

        loop {
            let envelope = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => None,
                envelope = state.receiver.recv() => envelope,
            }?;

            if !state.filter.admit(&envelope.payload().id) {
                debug!(message_id = %envelope.payload().id, "Skipping live duplicate of history");
                continue;
            }
            return Some((envelope, state));
        }
    })
    .boxed()
}

async fn load_history(store: &dyn MessageStore) -> VecDeque<Message> {
    match store.list_all().await {
        Ok(messages) => {
            debug!(count = messages.len(), "Loaded feed history");
            messages.into()
        }
        Err(e) => {
            error!(error = %e, "Failed to load feed history, continuing with live events");
            VecDeque::new()
        }
    }
}
