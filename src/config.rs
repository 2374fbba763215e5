//! Application configuration

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::RelayError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub viewer: ViewerConfig,
}

/// Datagram endpoint receiving reports from field devices
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub bind: SocketAddr,
    /// Datagrams buffered between the socket and the ingestion task
    pub queue_capacity: usize,
    pub max_datagram_size: usize,
    /// Apply every already-queued datagram before broadcasting once
    pub coalesce_bursts: bool,
}

/// WebSocket endpoint serving viewers
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ViewerConfig {
    pub bind: SocketAddr,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub ping_interval: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub ping_timeout: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub handshake_timeout: Duration,
    /// Outbound messages buffered per viewer before it is evicted
    pub send_queue_capacity: usize,
    pub status_message: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5005)),
            queue_capacity: 1024,
            max_datagram_size: 65535,
            coalesce_bursts: true,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5004)),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(20),
            handshake_timeout: Duration::from_secs(10),
            send_queue_capacity: 64,
            status_message: "Connected to server".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("LOCATIONRELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), RelayError> {
        self.ingest.validate()?;
        self.viewer.validate()?;
        Ok(())
    }
}

impl IngestConfig {
    fn validate(&self) -> Result<(), RelayError> {
        if self.queue_capacity == 0 {
            return Err(configuration_error("Ingest queue capacity must be greater than zero"));
        }
        if self.max_datagram_size == 0 {
            return Err(configuration_error("Maximum datagram size must be greater than zero"));
        }
        Ok(())
    }
}

impl ViewerConfig {
    fn validate(&self) -> Result<(), RelayError> {
        if self.ping_interval.is_zero() {
            return Err(configuration_error("Ping interval must be greater than zero"));
        }
        if self.ping_timeout.is_zero() {
            return Err(configuration_error("Ping timeout must be greater than zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(configuration_error("Handshake timeout must be greater than zero"));
        }
        if self.send_queue_capacity == 0 {
            return Err(configuration_error("Viewer send queue capacity must be greater than zero"));
        }
        Ok(())
    }
}

fn configuration_error(message: &str) -> RelayError {
    RelayError::ConfigurationError {
        message: message.to_string(),
    }
}
