//! Message simulator.
//!
//! Posts a generated message to the ingest endpoint on a fixed interval,
//! producing steady traffic for demos and manual testing.

use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SimulatorConfig, DEFAULT_USER_COUNT};

/// Deterministic message source cycling through a fixed set of users.
#[derive(Debug, Clone)]
pub struct MessageGenerator {
    counter: u64,
    user_count: u64,
}

/// A generated message ready to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedMessage {
    pub user_id: String,
    pub content: String,
}

impl MessageGenerator {
    /// `user_count <= 0` falls back to the default of 3 users.
    pub fn new(user_count: i64) -> Self {
        let user_count = if user_count <= 0 {
            DEFAULT_USER_COUNT
        } else {
            user_count
        };

        Self {
            counter: 1,
            user_count: user_count as u64,
        }
    }

    /// Advance the counter and produce the next message.
    pub fn next_message(&mut self) -> GeneratedMessage {
        self.counter += 1;
        GeneratedMessage {
            user_id: format!("user-{}", self.counter % self.user_count),
            content: format!("This is message number {}", self.counter),
        }
    }
}

/// Errors from posting to the ingest endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Ingest rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// HTTP client for `POST /api/messages`.
#[derive(Debug, Clone)]
pub struct IngestClient {
    http: reqwest::Client,
    endpoint: String,
}

impl IngestClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post one message. Any status of 400 or above is an error.
    pub async fn send(&self, message: &GeneratedMessage) -> Result<(), ClientError> {
        let response = self.http.post(&self.endpoint).json(message).send().await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Shortest tick period; a zero period cannot drive a timer.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Ticks on an interval and posts one generated message per tick.
pub struct Simulator {
    generator: MessageGenerator,
    client: IngestClient,
    interval: Duration,
}

impl Simulator {
    pub fn new(generator: MessageGenerator, client: IngestClient, interval: Duration) -> Self {
        Self {
            generator,
            client,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::new(
            MessageGenerator::new(config.user_count),
            IngestClient::new(&config.endpoint),
            config.interval(),
        )
    }

    /// Run until `cancel` fires. Send failures are logged and the next tick proceeds.
    ///
    /// Returns the number of messages accepted by the endpoint.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        info!(
            endpoint = %self.client.endpoint(),
            interval_ms = self.interval.as_millis() as u64,
            "Simulator started"
        );

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let message = self.generator.next_message();
            match self.client.send(&message).await {
                Ok(()) => {
                    sent += 1;
                    debug!(user_id = %message.user_id, content = %message.content, "Message sent");
                }
                Err(e) => warn!(error = %e, "Failed to send message"),
            }
        }

        info!(sent, "Simulator stopped");
        sent
    }
}
