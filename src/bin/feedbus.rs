//! feedbus: message feed service
//!
//! Serves the HTTP API and runs the pipeline workers in one process.
//!
//! ## Architecture
//! ```text
//! POST /api/messages -> [ingest topic] -> worker -> [message store]
//!                                            |
//!                                            v
//!                                     [processed topic] -> feed bridge -> GET /api/feed
//! ```
//!
//! ## Configuration
//! - FEEDBUS_CONFIG: Optional YAML config file
//! - FEEDBUS_LOG: Log filter (default "info")
//! - FEEDBUS_MESSAGING__TYPE: channel | kafka
//! - FEEDBUS_MESSAGING__KAFKA__BOOTSTRAP_SERVERS: Kafka brokers
//! - FEEDBUS_STORAGE__TYPE: sqlite | postgres

use tracing::{error, info};

use feedbus::config::Config;
use feedbus::utils::bootstrap::{init_tracing, shutdown_signal};
use feedbus::Application;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    info!(
        messaging_type = ?config.messaging.messaging_type,
        storage_type = ?config.storage.storage_type,
        addr = %config.server.bind_address(),
        "Starting feedbus"
    );

    let app = match Application::build(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Failed to start");
            return Err(e.into());
        }
    };

    app.run(shutdown_signal()).await?;
    Ok(())
}
