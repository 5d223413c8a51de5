//! Shared utilities for integration tests.
//!
//! Starts a full feedbus instance (in-process broker, in-memory SQLite) on
//! an ephemeral port and provides an HTTP client and an SSE reader for it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use feedbus::broadcast::Broadcaster;
use feedbus::config::Config;
use feedbus::consumer::ConsumeStats;
use feedbus::storage::MessageStore;
use feedbus::{AppError, Application, Message};

/// Upper bound for anything the pipeline should finish promptly.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestApp {
    pub base_url: String,
    pub http: reqwest::Client,
    pub store: Arc<dyn MessageStore>,
    pub broadcaster: Arc<Broadcaster<Message>>,
    pub worker_stats: Arc<ConsumeStats>,
    pub bridge_stats: Arc<ConsumeStats>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<(), AppError>>>,
}

impl TestApp {
    /// Start an instance with test defaults.
    pub async fn spawn() -> Self {
        Self::spawn_with(Config::for_test()).await
    }

    pub async fn spawn_with(config: Config) -> Self {
        let app = Application::build(config).await.expect("build application");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let store = app.store();
        let broadcaster = app.broadcaster();
        let worker_stats = app.worker_stats();
        let bridge_stats = app.bridge_stats();

        let (shutdown, signal) = oneshot::channel::<()>();
        let server = tokio::spawn(app.serve(listener, async {
            let _ = signal.await;
        }));

        Self {
            base_url: format!("http://{addr}"),
            http: reqwest::Client::new(),
            store,
            broadcaster,
            worker_stats,
            bridge_stats,
            shutdown: Some(shutdown),
            server: Some(server),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a message and return the response status.
    pub async fn post_message(&self, user_id: &str, content: &str) -> reqwest::StatusCode {
        self.http
            .post(self.url("/api/messages"))
            .json(&serde_json::json!({"user_id": user_id, "content": content}))
            .send()
            .await
            .expect("post message")
            .status()
    }

    /// Open `/api/feed`. The subscriber is registered once this returns.
    pub async fn open_feed(&self) -> SseReader {
        let response = self
            .http
            .get(self.url("/api/feed"))
            .send()
            .await
            .expect("open feed");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        SseReader::new(response)
    }

    /// Wait until the store holds `count` messages.
    pub async fn wait_for_stored(&self, count: usize) -> Vec<Message> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                let messages = self.store.list_all().await.expect("list messages");
                if messages.len() >= count {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("messages were not stored in time")
    }

    /// Signal shutdown and wait for `serve` to return.
    pub async fn shutdown(mut self) -> Result<(), AppError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let server = self.server.take().expect("server handle");
        tokio::time::timeout(STEP_TIMEOUT, server)
            .await
            .expect("shutdown timed out")
            .expect("server task panicked")
    }
}

/// Incremental reader of `data:` payloads from an SSE response.
pub struct SseReader {
    response: reqwest::Response,
    buffer: String,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Next event's JSON payload, or `None` if nothing arrives within `wait`
    /// or the stream ends.
    pub async fn next_within(&mut self, wait: Duration) -> Option<serde_json::Value> {
        tokio::time::timeout(wait, self.next_event()).await.ok().flatten()
    }

    /// Next event's JSON payload, failing the test if none arrives promptly.
    pub async fn next(&mut self) -> serde_json::Value {
        self.next_within(STEP_TIMEOUT)
            .await
            .expect("expected a feed event")
    }

    async fn next_event(&mut self) -> Option<serde_json::Value> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                if let Some(data) = frame.lines().find_map(|l| l.strip_prefix("data:")) {
                    return Some(serde_json::from_str(data.trim_start()).expect("event json"));
                }
                continue;
            }

            let chunk = self.response.chunk().await.ok()??;
            self.buffer.push_str(std::str::from_utf8(&chunk).expect("utf-8 frame"));
        }
    }
}

/// Message content carried by a feed event.
pub fn content_of(event: &serde_json::Value) -> &str {
    event["data"]["content"].as_str().expect("content")
}
