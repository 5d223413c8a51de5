//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::bus::PublishError;

/// Error returned by API handlers. Rendered as a plain-text body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request body")]
    InvalidBody(String),

    #[error("Failed to publish message")]
    Publish(#[from] PublishError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Details stay in the log; clients get the fixed message.
        match &self {
            Self::InvalidBody(detail) => tracing::debug!(detail = %detail, "Rejected request body"),
            Self::Publish(e) => error!(error = %e, "Publish failed"),
        }
        (self.status(), self.to_string()).into_response()
    }
}
