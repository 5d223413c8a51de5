//! Message simulator configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Fallback when `user_count` is not positive.
pub const DEFAULT_USER_COUNT: i64 = 3;

/// Message simulator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Ingest endpoint the simulator posts to.
    pub endpoint: String,
    /// Seconds between generated messages.
    pub interval_secs: u64,
    /// Number of distinct simulated users.
    pub user_count: i64,
}

impl SimulatorConfig {
    /// Tick interval, at least one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/messages".to_string(),
            interval_secs: 10,
            user_count: DEFAULT_USER_COUNT,
        }
    }
}
