//! Live feed endpoint (Server-Sent Events).

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tracing::{debug, error};

use super::AppState;
use crate::feed::open_feed;

/// Stream stored history, then live messages, one envelope per event.
///
/// Each event is framed as `data: <envelope json>`. The stream stays open
/// until the client disconnects or the server shuts down.
pub(crate) async fn feed(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(subscribers = state.broadcaster.subscriber_count(), "Feed connection opened");

    let envelopes = open_feed(
        state.broadcaster.clone(),
        state.store.clone(),
        state.shutdown.child_token(),
    );

    let events = envelopes.filter_map(|envelope| async move {
        match Event::default().json_data(envelope.as_ref()) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                error!(envelope_id = %envelope.id(), error = %e, "Failed to encode feed event");
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.feed.keep_alive()))
}
