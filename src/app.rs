//! Application wiring and lifecycle.
//!
//! Startup connects storage (fatal on failure), builds the broker clients,
//! the worker and the feed bridge, and serves the HTTP API. Shutdown runs in
//! a fixed order:
//!
//! 1. cancel the root token (stops fetches, ends open feeds)
//! 2. join the worker and the feed bridge
//! 3. wait for the HTTP server to drain, bounded by the configured timeout
//! 4. flush and close the producers
//! 5. close storage

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{build_router, AppState};
use crate::broadcast::Broadcaster;
use crate::bus::{Broker, BusError, Publisher};
use crate::config::Config;
use crate::consumer::{ConsumeLoop, ConsumeStats};
use crate::feed::FeedBridge;
use crate::message::Message;
use crate::storage::{init_storage, MessageStore, StorageError};
use crate::worker::{PersistAndRepublish, Worker};

/// Errors that prevent the service from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Broker error: {0}")]
    Broker(#[from] BusError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// The assembled service.
pub struct Application {
    config: Config,
    store: Arc<dyn MessageStore>,
    ingest_publisher: Arc<Publisher<Message>>,
    processed_publisher: Arc<Publisher<Message>>,
    broadcaster: Arc<Broadcaster<Message>>,
    worker: Worker<Message>,
    bridge: FeedBridge,
    shutdown: CancellationToken,
}

impl Application {
    /// Connect storage and the configured broker, then assemble the service.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let store = init_storage(&config.storage).await?;
        let broker = Broker::from_config(&config.messaging)?;
        Self::with_parts(config, broker, store)
    }

    /// Assemble the service around an existing broker and store.
    pub fn with_parts(
        config: Config,
        broker: Broker,
        store: Arc<dyn MessageStore>,
    ) -> Result<Self, AppError> {
        let messaging = &config.messaging;

        let ingest_publisher = Arc::new(Publisher::new(broker.producer()?));
        let processed_publisher = Arc::new(Publisher::new(broker.producer()?));
        let broadcaster = Arc::new(Broadcaster::new(config.feed.queue_capacity));

        let handler = Arc::new(PersistAndRepublish::new(
            Arc::clone(&store),
            Arc::clone(&processed_publisher),
            messaging.processed_topic.clone(),
        ));
        let consume_loop = ConsumeLoop::<Message>::new(
            "worker",
            broker.consumer(&messaging.ingest_topic, &messaging.group_id)?,
            handler,
        )
        .with_coordinator_backoff(messaging.coordinator_backoff())
        .with_retry_backoff(messaging.retry_backoff());
        let worker = Worker::new("worker", consume_loop);

        let bridge = FeedBridge::new(
            broker.consumer(&messaging.processed_topic, &messaging.feed_group_id())?,
            Arc::clone(&broadcaster),
            messaging.coordinator_backoff(),
        );

        info!(
            ingest_topic = %messaging.ingest_topic,
            processed_topic = %messaging.processed_topic,
            group_id = %messaging.group_id,
            "Application assembled"
        );

        Ok(Self {
            config,
            store,
            ingest_publisher,
            processed_publisher,
            broadcaster,
            worker,
            bridge,
            shutdown: CancellationToken::new(),
        })
    }

    /// HTTP router bound to this application's state.
    pub fn router(&self) -> Router {
        build_router(AppState {
            publisher: Arc::clone(&self.ingest_publisher),
            ingest_topic: Arc::from(self.config.messaging.ingest_topic.as_str()),
            broadcaster: Arc::clone(&self.broadcaster),
            store: Arc::clone(&self.store),
            feed: self.config.feed.clone(),
            shutdown: self.shutdown.clone(),
        })
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        Arc::clone(&self.store)
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster<Message>> {
        Arc::clone(&self.broadcaster)
    }

    pub fn worker_stats(&self) -> Arc<ConsumeStats> {
        self.worker.stats()
    }

    pub fn bridge_stats(&self) -> Arc<ConsumeStats> {
        self.bridge.stats()
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the worker and the feed bridge.
    pub fn start(&mut self) {
        self.worker.start(self.shutdown.child_token());
        self.bridge.start(self.shutdown.child_token());
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn run(self, signal: impl Future<Output = ()> + Send) -> Result<(), AppError> {
        let listener = TcpListener::bind(self.config.server.bind_address()).await?;
        self.serve(listener, signal).await
    }

    /// Serve on `listener` until `signal` resolves, then shut down in order.
    pub async fn serve(
        mut self,
        listener: TcpListener,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), AppError> {
        let addr: SocketAddr = listener.local_addr()?;
        let router = self.router();

        self.start();

        let server_shutdown = self.shutdown.clone().cancelled_owned();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(server_shutdown)
                .await
        });

        info!(addr = %addr, "HTTP server listening");

        let server_exit = tokio::select! {
            _ = signal => {
                info!("Shutdown requested");
                None
            }
            _ = self.shutdown.cancelled() => {
                info!("Shutdown token cancelled");
                None
            }
            result = &mut server => Some(result),
        };

        if let Some(result) = server_exit {
            // The server exited on its own; shut the rest down and report why.
            self.shutdown.cancel();
            self.stop_background().await;
            self.close_clients().await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(AppError::Io(e)),
                Err(e) => Err(AppError::Io(std::io::Error::other(e))),
            };
        }

        self.shutdown.cancel();
        self.stop_background().await;

        let timeout = self.config.server.shutdown_timeout();
        match tokio::time::timeout(timeout, &mut server).await {
            Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
            Ok(Ok(Err(e))) => error!(error = %e, "HTTP server failed during shutdown"),
            Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "HTTP server shutdown timed out");
                server.abort();
            }
        }

        self.close_clients().await;
        info!("Shutdown complete");
        Ok(())
    }

    async fn stop_background(&mut self) {
        self.worker.stop().await;
        self.bridge.stop().await;
    }

    async fn close_clients(&self) {
        for publisher in [&self.ingest_publisher, &self.processed_publisher] {
            if let Err(e) = publisher.close().await {
                error!(error = %e, "Failed to close publisher");
            }
        }
        self.store.close().await;
    }
}
