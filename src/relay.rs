//! Relay instance wiring ingestion to viewers

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use crate::{
    acceptor::{ConnectionAcceptor, ViewerContext},
    broadcast::Broadcaster,
    config::AppConfig,
    errors::RelayError,
    ingest::{self, IngestListener},
    registry::SubscriptionRegistry,
    table::LocationTable,
};

/// One relay with its own location table and subscribers
///
/// Both endpoints are bound at construction, so a relay that exists can
/// serve; several relays may run side by side in one process.
pub struct Relay {
    config: AppConfig,
    table: Arc<LocationTable>,
    registry: Arc<SubscriptionRegistry>,
    ingest: IngestListener,
    acceptor: ConnectionAcceptor,
}

impl Relay {
    /// Validate the configuration and bind both endpoints
    pub async fn bind(config: &AppConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let ingest = IngestListener::bind(&config.ingest).await?;
        let acceptor = ConnectionAcceptor::bind(&config.viewer).await?;

        Ok(Self {
            config: config.clone(),
            table: Arc::new(LocationTable::new()),
            registry: Arc::new(SubscriptionRegistry::new()),
            ingest,
            acceptor,
        })
    }

    pub fn ingest_addr(&self) -> Result<SocketAddr, RelayError> {
        self.ingest.local_addr()
    }

    pub fn viewer_addr(&self) -> Result<SocketAddr, RelayError> {
        self.acceptor.local_addr()
    }

    pub fn table(&self) -> Arc<LocationTable> {
        self.table.clone()
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Serve until one of the input sources stops
    pub async fn run(self) -> Result<(), RelayError> {
        info!(
            "Relay running - viewers: {}, ingest: {}",
            self.viewer_addr()?,
            self.ingest_addr()?
        );

        let broadcaster = Broadcaster::new(self.table.clone(), self.registry.clone());
        let context = ViewerContext {
            table: self.table.clone(),
            registry: self.registry.clone(),
            broadcaster: broadcaster.clone(),
            config: self.config.viewer.clone(),
        };
        let receiver = self.ingest.spawn();
        let coalesce_bursts = self.config.ingest.coalesce_bursts;

        tokio::select! {
            _ = ingest::run_ingest(receiver, &self.table, &broadcaster, coalesce_bursts) => {
                error!("Ingest receive loop stopped");
                Ok(())
            }
            result = self.acceptor.run(context) => {
                if let Err(e) = &result {
                    error!("Viewer acceptor stopped: {}", e);
                }
                result
            }
        }
    }
}
