//! Errors for the location relay
use std::net::SocketAddr;

use thiserror::Error;

use crate::registry::SubscriberId;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to bind {endpoint} endpoint on {addr}: {source}")]
    Bind {
        endpoint: &'static str,
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("WebSocket error")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    #[error("Viewer stopped reading, send timed out")]
    SendTimeout,

    #[error("Subscriber {0} is closed")]
    SubscriberClosed(SubscriberId),

    #[error("Subscriber {0} is not keeping up")]
    SubscriberLagging(SubscriberId),
}

/// Reasons an inbound datagram never reaches the location table
#[derive(Error, Debug)]
pub enum Rejected {
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("missing or empty user_id")]
    MissingSourceId,

    #[error("latitude {0} outside -90..=90")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} outside -180..=180")]
    LongitudeOutOfRange(f64),
}
