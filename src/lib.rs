//! Relay of live field device positions to WebSocket viewers

pub mod acceptor;
pub mod broadcast;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod relay;
pub mod table;
