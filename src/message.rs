//! The user message carried through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::Eventable;

/// A short user message.
///
/// The `id` is assigned once at ingest and survives the ingest -> processed
/// hop unchanged, so persisted rows and broadcast events for the same message
/// share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message with a fresh id stamped at the current time.
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

impl Eventable for Message {
    const KIND: &'static str = "message";
}
