//! Live feed configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Live feed configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Capacity of each subscriber queue. A full queue drops events for that subscriber.
    pub queue_capacity: usize,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_secs: u64,
}

impl FeedConfig {
    /// Keep-alive interval, at least one second.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            keep_alive_secs: 15,
        }
    }
}
