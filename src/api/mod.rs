//! HTTP API.
//!
//! | Route               | Method | Purpose                           |
//! |---------------------|--------|-----------------------------------|
//! | `/api/messages`     | POST   | Ingest a message (202 / 400 / 500) |
//! | `/api/feed`         | GET    | SSE: history, then live messages  |
//! | `/api/health`       | GET    | Liveness (`OK`)                   |

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::broadcast::Broadcaster;
use crate::bus::Publisher;
use crate::config::FeedConfig;
use crate::message::Message;
use crate::storage::MessageStore;

pub mod error;
mod feed;
mod health;
pub mod messages;

pub use error::ApiError;
pub use messages::AddMessageRequest;

/// Shared state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<Publisher<Message>>,
    pub ingest_topic: Arc<str>,
    pub broadcaster: Arc<Broadcaster<Message>>,
    pub store: Arc<dyn MessageStore>,
    pub feed: FeedConfig,
    /// Cancelled at shutdown; ends every open feed.
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
            )
        });

    Router::new()
        .route("/api/messages", post(messages::add_message))
        .route("/api/feed", get(feed::feed))
        .route("/api/health", get(health::health))
        .layer(trace_layer)
        .with_state(state)
}
