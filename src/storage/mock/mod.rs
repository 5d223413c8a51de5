//! Mock MessageStore implementation for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::message::Message;
use crate::storage::{MessageStore, Result, StorageError};

/// Mock message store that keeps messages in memory.
#[derive(Default)]
pub struct MockMessageStore {
    messages: RwLock<Vec<Message>>,
    fail_on_save: RwLock<bool>,
    fail_on_list: RwLock<bool>,
    save_calls: RwLock<usize>,
    closed: RwLock<bool>,
}

impl MockMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_save(&self, fail: bool) {
        *self.fail_on_save.write().await = fail;
    }

    pub async fn set_fail_on_list(&self, fail: bool) {
        *self.fail_on_list.write().await = fail;
    }

    /// Number of `save` calls, including failed and duplicate ones.
    pub async fn save_calls(&self) -> usize {
        *self.save_calls.read().await
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn save(&self, message: &Message) -> Result<()> {
        *self.save_calls.write().await += 1;
        if *self.fail_on_save.read().await {
            return Err(StorageError::Unavailable("Mock save failure".to_string()));
        }

        let mut messages = self.messages.write().await;
        if !messages.iter().any(|m| m.id == message.id) {
            messages.push(message.clone());
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Message>> {
        if *self.fail_on_list.read().await {
            return Err(StorageError::Unavailable("Mock list failure".to_string()));
        }

        let mut messages = self.messages.read().await.clone();
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(messages)
    }

    async fn close(&self) {
        *self.closed.write().await = true;
    }
}

#[cfg(test)]
mod tests;
