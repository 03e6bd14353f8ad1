//! Channels feeding the hub event loop.
//!
//! Four sources, each with its own channel: connect, disconnect, inbound
//! request, broadcast. Connect and disconnect are unbounded so membership
//! changes are never refused; requests and broadcasts are bounded so a flood
//! of inbound frames or broadcasts pushes back on its producers instead of
//! growing without limit.
//!
//! Connections reach the hub through a [`HubLink`] holding weak senders, so
//! a connection never keeps the hub's channels alive on its own.

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::stats::HubStats;
use crate::config::HubConfig;
use crate::connection::{ConnectionId, ConnectionInfo, Outbound};

/// A freshly upgraded connection, handed to the event loop.
#[derive(Debug)]
pub(crate) struct ConnEntry {
    pub(crate) info: ConnectionInfo,
    /// Dropping this sender is what closes the mailbox.
    pub(crate) mailbox: Sender<Outbound>,
    /// Outbound pump; awaited during shutdown drain.
    pub(crate) writer: JoinHandle<()>,
}

/// One inbound data frame, as read by a connection's inbound pump.
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) connection: ConnectionId,
    pub(crate) frame: Bytes,
    pub(crate) received_at: Instant,
}

impl Request {
    pub(crate) fn new(connection: ConnectionId, frame: Bytes) -> Self {
        Self {
            connection,
            frame,
            received_at: Instant::now(),
        }
    }

    /// Frame length in bytes.
    pub(crate) fn len(&self) -> usize {
        self.frame.len()
    }
}

/// Producer side, held by the [`Hub`](crate::Hub) handle.
#[derive(Debug)]
pub(crate) struct Senders {
    pub(crate) connect: UnboundedSender<ConnEntry>,
    pub(crate) disconnect: UnboundedSender<ConnectionId>,
    pub(crate) requests: Sender<Request>,
    pub(crate) broadcasts: Sender<Bytes>,
}

/// Consumer side, moved into the event loop on start.
#[derive(Debug)]
pub(crate) struct Receivers {
    pub(crate) connect: UnboundedReceiver<ConnEntry>,
    pub(crate) disconnect: UnboundedReceiver<ConnectionId>,
    pub(crate) requests: Receiver<Request>,
    pub(crate) broadcasts: Receiver<Bytes>,
}

pub(crate) fn channels(config: &HubConfig) -> (Senders, Receivers) {
    let (connect_tx, connect_rx) = mpsc::unbounded_channel();
    let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
    let (request_tx, request_rx) = mpsc::channel(config.request_queue.max(1));
    let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_queue.max(1));
    (
        Senders {
            connect: connect_tx,
            disconnect: disconnect_tx,
            requests: request_tx,
            broadcasts: broadcast_tx,
        },
        Receivers {
            connect: connect_rx,
            disconnect: disconnect_rx,
            requests: request_rx,
            broadcasts: broadcast_rx,
        },
    )
}

/// A connection's view of its hub: lookup only, no ownership.
#[derive(Debug, Clone)]
pub(crate) struct HubLink {
    requests: mpsc::WeakSender<Request>,
    disconnects: mpsc::WeakUnboundedSender<ConnectionId>,
    stats: Arc<HubStats>,
}

impl HubLink {
    pub(crate) fn new(senders: &Senders, stats: &Arc<HubStats>) -> Self {
        Self {
            requests: senders.requests.downgrade(),
            disconnects: senders.disconnect.downgrade(),
            stats: Arc::clone(stats),
        }
    }

    /// Queue a request for dispatch, waiting for room.
    ///
    /// Returns `false` once the hub is gone.
    pub(crate) async fn submit(&self, request: Request) -> bool {
        match self.requests.upgrade() {
            Some(tx) => tx.send(request).await.is_ok(),
            None => false,
        }
    }

    /// Ask the hub to drop `id`. Safe to call for an already-removed connection.
    pub(crate) fn disconnect(&self, id: ConnectionId) {
        if let Some(tx) = self.disconnects.upgrade() {
            let _ = tx.send(id);
        }
    }

    pub(crate) fn protocol_violation(&self) {
        HubStats::bump(&self.stats.protocol_violations);
    }
}
