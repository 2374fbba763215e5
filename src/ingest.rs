//! Datagram ingestion of field device reports

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    broadcast::Broadcaster, config::IngestConfig, decoder, errors::RelayError,
    table::LocationTable,
};

/// Raw datagram as received from the socket
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub peer: SocketAddr,
}

/// Bound datagram socket, not yet receiving
pub struct IngestListener {
    socket: UdpSocket,
    config: IngestConfig,
}

/// Queue of received datagrams, fed by a background receive loop
///
/// Dropping the receiver stops the loop and releases the socket.
pub struct IngestReceiver {
    rx: mpsc::Receiver<Datagram>,
    handle: tokio::task::JoinHandle<()>,
}

impl IngestListener {
    /// Bind the ingest endpoint
    pub async fn bind(config: &IngestConfig) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(config.bind)
            .await
            .map_err(|source| RelayError::Bind {
                endpoint: "ingest",
                addr: config.bind,
                source,
            })?;

        Ok(Self {
            socket,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.socket.local_addr()?)
    }

    /// Start receiving datagrams in a background task
    pub fn spawn(self) -> IngestReceiver {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let handle = tokio::spawn(Self::receive_loop(
            self.socket,
            self.config.max_datagram_size,
            tx,
        ));

        IngestReceiver { rx, handle }
    }

    /// Receive datagrams until the queue is dropped
    ///
    /// A full queue drops the datagram: only the latest fix matters and
    /// the socket must keep draining.
    async fn receive_loop(socket: UdpSocket, max_datagram_size: usize, tx: mpsc::Sender<Datagram>) {
        if let Ok(addr) = socket.local_addr() {
            info!("Listening for location reports on udp://{}", addr);
        }
        let mut buf = vec![0u8; max_datagram_size];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((size, peer)) => {
                    let datagram = Datagram {
                        payload: buf[..size].to_vec(),
                        peer,
                    };
                    match tx.try_send(datagram) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(datagram)) => {
                            warn!(peer = %datagram.peer, "Ingest queue full, dropping datagram");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            info!("Ingest queue closed, stopping receive loop");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("UDP receive error: {}", e);
                }
            }
        }
    }
}

impl IngestReceiver {
    /// Receive next datagram
    pub async fn recv(&mut self) -> Option<Datagram> {
        self.rx.recv().await
    }

    /// Next datagram if one is already queued
    pub fn try_recv(&mut self) -> Option<Datagram> {
        self.rx.try_recv().ok()
    }
}

impl Drop for IngestReceiver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Decode a datagram and store it in the table
///
/// Returns whether the report was accepted.
pub async fn process_datagram(datagram: &Datagram, table: &LocationTable) -> bool {
    match decoder::decode(&datagram.payload) {
        Ok(report) => {
            debug!(peer = %datagram.peer, source = %report.source_id, "accepted report");
            table.upsert(report).await
        }
        Err(e) => {
            debug!(peer = %datagram.peer, "Dropping datagram: {}", e);
            false
        }
    }
}

/// Single ingestion task: apply datagrams to the table and trigger broadcasts
///
/// With `coalesce_bursts`, every datagram already waiting in the queue is
/// applied before one broadcast covers them all. Returns when the receive
/// loop is gone.
pub async fn run_ingest(
    mut receiver: IngestReceiver,
    table: &LocationTable,
    broadcaster: &Broadcaster,
    coalesce_bursts: bool,
) {
    while let Some(datagram) = receiver.recv().await {
        let mut changed = process_datagram(&datagram, table).await;

        if coalesce_bursts {
            while let Some(datagram) = receiver.try_recv() {
                changed |= process_datagram(&datagram, table).await;
            }
        }

        if changed {
            if let Err(e) = broadcaster.broadcast_current_state().await {
                error!("Broadcast error: {}", e);
            }
        }
    }
}
