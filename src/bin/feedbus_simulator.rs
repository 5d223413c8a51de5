//! feedbus-simulator: posts generated messages to a feedbus instance
//!
//! ## Configuration
//! - FEEDBUS_SIMULATOR__ENDPOINT: Ingest URL (default http://localhost:8080/api/messages)
//! - FEEDBUS_SIMULATOR__INTERVAL_SECS: Seconds between messages (default 10)
//! - FEEDBUS_SIMULATOR__USER_COUNT: Number of simulated users (default 3)

use tokio_util::sync::CancellationToken;

use feedbus::config::Config;
use feedbus::simulator::Simulator;
use feedbus::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let simulator = Simulator::from_config(&config.simulator);

    let cancel = CancellationToken::new();
    let run = tokio::spawn(simulator.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();
    run.await?;

    Ok(())
}
