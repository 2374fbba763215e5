//! Snapshot fan-out to connected viewers

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    errors::RelayError,
    models::ViewerMessage,
    registry::{Frame, SubscriptionRegistry},
    table::LocationTable,
};

/// Result of one broadcast round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub evicted: usize,
}

/// Pushes the current location table to every registered viewer
#[derive(Debug, Clone)]
pub struct Broadcaster {
    table: Arc<LocationTable>,
    registry: Arc<SubscriptionRegistry>,
}

impl Broadcaster {
    pub fn new(table: Arc<LocationTable>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { table, registry }
    }

    /// Serialize the current table once and push it to all subscribers
    ///
    /// Subscribers whose push fails are removed; delivery to the rest goes on.
    pub async fn broadcast_current_state(&self) -> Result<BroadcastOutcome, RelayError> {
        let client_count = self.registry.len().await;
        if client_count == 0 {
            return Ok(BroadcastOutcome::default());
        }

        let frame = self.snapshot_frame(client_count).await?;

        let mut outcome = BroadcastOutcome::default();
        let mut failed = Vec::new();
        self.registry
            .each(|subscriber| match subscriber.push(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(id = %subscriber.id, peer = %subscriber.peer, "Evicting subscriber: {}", e);
                    failed.push(subscriber.id);
                }
            })
            .await;

        for id in failed {
            self.registry.remove(id).await;
            outcome.evicted += 1;
        }

        debug!(
            delivered = outcome.delivered,
            evicted = outcome.evicted,
            "broadcast location update"
        );
        Ok(outcome)
    }

    /// Serialized `location_update` carrying the whole table
    pub async fn snapshot_frame(&self, client_count: usize) -> Result<Frame, RelayError> {
        let message = ViewerMessage::location_update(client_count, self.table.snapshot().await);
        Ok(Arc::new(serde_json::to_string(&message)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationReport;
    use crate::registry::Subscriber;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn setup() -> (Broadcaster, Arc<LocationTable>, Arc<SubscriptionRegistry>) {
        let table = Arc::new(LocationTable::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Broadcaster::new(table.clone(), registry.clone());
        (broadcaster, table, registry)
    }

    async fn subscribe(
        registry: &SubscriptionRegistry,
        capacity: usize,
    ) -> (Subscriber, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        let subscriber = Subscriber::new(registry.next_id(), peer, tx);
        registry.add(subscriber.clone()).await;
        (subscriber, rx)
    }

    fn report(source_id: &str, latitude: f64, longitude: f64) -> LocationReport {
        LocationReport {
            source_id: source_id.to_string(),
            latitude,
            longitude,
            quality: Some(1),
            source_time: None,
        }
    }

    #[tokio::test]
    async fn no_subscribers_is_noop() {
        let (broadcaster, table, _registry) = setup();
        table.upsert(report("client1", 1.0, 2.0)).await;

        let outcome = broadcaster.broadcast_current_state().await.unwrap();
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[tokio::test]
    async fn identical_frame_to_every_subscriber() {
        let (broadcaster, table, registry) = setup();
        let (_s1, mut rx1) = subscribe(&registry, 4).await;
        let (_s2, mut rx2) = subscribe(&registry, 4).await;
        table.upsert(report("client1", 37.5, 127.0)).await;

        let outcome = broadcaster.broadcast_current_state().await.unwrap();
        assert_eq!(outcome.delivered, 2);

        let f1 = rx1.recv().await.unwrap();
        let f2 = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&f1, &f2));

        let message: ViewerMessage = serde_json::from_str(&f1).unwrap();
        match message {
            ViewerMessage::LocationUpdate {
                client_count,
                locations,
                ..
            } => {
                assert_eq!(client_count, 2);
                assert_eq!(locations["client1"].latitude, 37.5);
                assert_eq!(locations["client1"].longitude, 127.0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_subscriber_is_evicted() {
        let (broadcaster, table, registry) = setup();
        let (closed, rx_closed) = subscribe(&registry, 4).await;
        let (alive, mut rx_alive) = subscribe(&registry, 4).await;
        drop(rx_closed);
        table.upsert(report("client1", 1.0, 2.0)).await;

        let outcome = broadcaster.broadcast_current_state().await.unwrap();
        assert_eq!(outcome, BroadcastOutcome { delivered: 1, evicted: 1 });
        assert!(!registry.contains(closed.id).await);
        assert!(registry.contains(alive.id).await);
        assert!(rx_alive.recv().await.is_some());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_evicted() {
        let (broadcaster, table, registry) = setup();
        let (slow, _rx_slow) = subscribe(&registry, 1).await;
        table.upsert(report("client1", 1.0, 2.0)).await;

        broadcaster.broadcast_current_state().await.unwrap();
        let outcome = broadcaster.broadcast_current_state().await.unwrap();

        assert_eq!(outcome.evicted, 1);
        assert!(!registry.contains(slow.id).await);
    }
}
