//! Message ingest endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::message::Message;

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddMessageRequest {
    pub user_id: String,
    pub content: String,
}

/// Accept a message for processing.
///
/// Returns `202 Accepted` once the message is handed to the broker client.
/// The message is stored and broadcast asynchronously.
pub(crate) async fn add_message(
    State(state): State<AppState>,
    body: Result<Json<AddMessageRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let message = Message::new(request.user_id, request.content);
    let message_id = message.id.clone();

    state.publisher.publish(&state.ingest_topic, message).await?;

    info!(message_id = %message_id, "Message accepted");
    Ok(StatusCode::ACCEPTED)
}
