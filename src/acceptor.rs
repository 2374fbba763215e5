//! Viewer WebSocket connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::ViewerConfig,
    errors::RelayError,
    models::ViewerMessage,
    registry::{Frame, Subscriber, SubscriptionRegistry},
    table::LocationTable,
};

/// Why a viewer connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or closed the socket
    PeerClosed,
    /// The subscriber was removed from the registry by a failed push
    Evicted,
    /// No frame from the peer within the ping timeout
    PingTimeout,
    /// A send stayed blocked for the ping timeout
    SendTimeout,
}

type ViewerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Shared state every viewer connection needs
#[derive(Debug, Clone)]
pub struct ViewerContext {
    pub table: Arc<LocationTable>,
    pub registry: Arc<SubscriptionRegistry>,
    pub broadcaster: Broadcaster,
    pub config: ViewerConfig,
}

/// Bound viewer endpoint
pub struct ConnectionAcceptor {
    listener: TcpListener,
}

impl ConnectionAcceptor {
    /// Bind the viewer endpoint
    pub async fn bind(config: &ViewerConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| RelayError::Bind {
                endpoint: "viewer",
                addr: config.bind,
                source,
            })?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept viewer connections forever, one task per connection
    pub async fn run(self, context: ViewerContext) -> Result<(), RelayError> {
        info!("Accepting viewers on ws://{}", self.local_addr()?);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let context = context.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, context).await {
                            debug!(%peer, "Viewer connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept viewer connection: {}", e);
                }
            }
        }
    }
}

/// Drive one viewer from handshake to close
///
/// The subscriber is removed from the registry on every exit path once it
/// has been registered.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: ViewerContext,
) -> Result<CloseReason, RelayError> {
    let ws = time::timeout(
        context.config.handshake_timeout,
        tokio_tungstenite::accept_async(stream),
    )
    .await
    .map_err(|_| RelayError::HandshakeTimeout)??;

    let (tx, rx) = mpsc::channel(context.config.send_queue_capacity);
    let subscriber = Subscriber::new(context.registry.next_id(), peer, tx);
    let id = subscriber.id;
    let client_count = context.registry.add(subscriber).await;
    info!(%id, %peer, client_count, "Viewer connected");

    let result = match serve(ws, rx, &context).await {
        Err(RelayError::SendTimeout) => Ok(CloseReason::SendTimeout),
        other => other,
    };

    context.registry.remove(id).await;
    match &result {
        Ok(reason) => info!(%id, %peer, ?reason, "Viewer disconnected"),
        Err(e) => info!(%id, %peer, "Viewer connection failed: {}", e),
    }
    result
}

async fn serve(
    ws: WebSocketStream<TcpStream>,
    mut rx: mpsc::Receiver<Frame>,
    context: &ViewerContext,
) -> Result<CloseReason, RelayError> {
    let (mut sink, mut stream) = ws.split();
    let send_limit = context.config.ping_timeout;

    let client_count = context.registry.len().await;
    let status = ViewerMessage::status(context.config.status_message.clone(), client_count);
    let status = Message::text(serde_json::to_string(&status)?);
    send_within(&mut sink, status, send_limit).await?;

    if !context.table.is_empty().await {
        let frame = context.broadcaster.snapshot_frame(client_count).await?;
        send_within(&mut sink, Message::text(frame.to_string()), send_limit).await?;
    }

    let ping_interval = context.config.ping_interval;
    let mut pings = time::interval_at(Instant::now() + ping_interval, ping_interval);
    // Armed by a ping, cleared by any frame from the peer
    let mut pong_deadline: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    send_within(&mut sink, Message::text(frame.to_string()), send_limit).await?
                }
                None => break CloseReason::Evicted,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                Some(Ok(_)) => pong_deadline = None,
                Some(Err(e)) => return Err(e.into()),
            },
            _ = pings.tick() => {
                send_within(&mut sink, Message::Ping(Default::default()), send_limit).await?;
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + context.config.ping_timeout);
                }
            }
            _ = time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                break CloseReason::PingTimeout;
            }
        }
    };

    // Best effort, the peer may already be gone
    let _ = time::timeout(send_limit, sink.close()).await;
    Ok(reason)
}

/// Send one message, giving up once `limit` has passed
///
/// A viewer that stops reading fills the socket buffers and would otherwise
/// park the connection task forever.
async fn send_within(
    sink: &mut ViewerSink,
    message: Message,
    limit: Duration,
) -> Result<(), RelayError> {
    time::timeout(limit, sink.send(message))
        .await
        .map_err(|_| RelayError::SendTimeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn context(config: ViewerConfig) -> ViewerContext {
        let table = Arc::new(LocationTable::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        ViewerContext {
            broadcaster: Broadcaster::new(table.clone(), registry.clone()),
            table,
            registry,
            config,
        }
    }

    async fn accept_one(
        context: ViewerContext,
    ) -> (
        SocketAddr,
        tokio::task::JoinHandle<Result<CloseReason, RelayError>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(stream, peer, context).await
        });
        (addr, handle)
    }

    async fn wait_for_subscribers(registry: &SubscriptionRegistry, count: usize) {
        time::timeout(TIMEOUT, async {
            while registry.len().await != count {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Subscriber count never reached");
    }

    #[tokio::test]
    async fn peer_close_removes_subscriber() {
        let context = context(ViewerConfig::default());
        let registry = context.registry.clone();
        let (addr, handle) = accept_one(context).await;

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        wait_for_subscribers(&registry, 1).await;
        ws.close(None).await.unwrap();

        let reason = time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
        assert_eq!(reason.unwrap(), CloseReason::PeerClosed);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn stalled_viewer_connection_is_released() {
        let config = ViewerConfig {
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(300),
            send_queue_capacity: 4,
            ..ViewerConfig::default()
        };
        let context = context(config);
        let registry = context.registry.clone();
        let (addr, handle) = accept_one(context).await;

        // Connected but never read from again
        let (_viewer, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        wait_for_subscribers(&registry, 1).await;

        let frame: Frame = Arc::new("x".repeat(1 << 20));
        time::timeout(TIMEOUT, async {
            while let Some(subscriber) = registry.snapshot().await.first() {
                let _ = subscriber.push(frame.clone());
                time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("Stalled viewer was never removed");

        let reason = time::timeout(TIMEOUT, handle)
            .await
            .expect("Connection task stayed blocked on the stalled viewer")
            .unwrap();
        assert!(matches!(
            reason,
            Ok(CloseReason::SendTimeout) | Ok(CloseReason::PingTimeout)
        ));
    }
}
