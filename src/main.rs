//! Location relay server

use location_relay::{config::AppConfig, errors::RelayError, relay::Relay};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables over config files
    let config = AppConfig::load()?;

    let relay = match Relay::bind(&config).await {
        Ok(relay) => relay,
        Err(e) => {
            error!("Relay startup failed: {}", e);
            return Err(e);
        }
    };

    let shutdown_signal = signal::ctrl_c();

    tokio::select! {
        result = relay.run() => {
            info!("Relay completed: {:?}", result);
            result?;
        }
        _ = shutdown_signal => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
