//! The hub's single event loop.
//!
//! Exactly one task runs [`EventLoop::run`]. It owns the live-connection set
//! and the registry, and handles one event at a time to completion. The
//! directory behind the `RwLock` mirrors the live set for outside readers; the
//! loop itself never reads it.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{ConnEntry, Receivers, Request};
use super::stats::HubStats;
use crate::codec::Codec;
use crate::config::OverflowPolicy;
use crate::connection::{ConnectionId, ConnectionInfo, Outbound};
use crate::envelope::Envelope;
use crate::registry::{CallContext, Decoder, Registry};
use crate::status::Status;

pub(crate) type Directory = Arc<RwLock<HashMap<ConnectionId, ConnectionInfo>>>;

/// Result of putting one item in a mailbox.
enum Delivery {
    Queued,
    Full,
    Closed,
}

pub(crate) struct EventLoop {
    pub(crate) receivers: Receivers,
    pub(crate) registry: Arc<Registry>,
    pub(crate) codec: Arc<Codec>,
    pub(crate) directory: Directory,
    pub(crate) stats: Arc<HubStats>,
    pub(crate) overflow: OverflowPolicy,
    pub(crate) drain_timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) live: HashMap<ConnectionId, ConnEntry>,
}

impl EventLoop {
    pub(crate) async fn run(mut self) {
        log::info!(
            "[Hub] Event loop started ({} services, codec {})",
            self.registry.len(),
            self.codec.name()
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                Some(entry) = self.receivers.connect.recv() => self.connect(entry),

                Some(id) = self.receivers.disconnect.recv() => {
                    if self.remove(id).is_some() {
                        log::debug!("[Hub] {} disconnected", id);
                    }
                }

                Some(request) = self.receivers.requests.recv() => self.dispatch(request).await,

                Some(payload) = self.receivers.broadcasts.recv() => self.broadcast(payload).await,

                else => break,
            }
        }

        self.drain().await;
    }

    fn connect(&mut self, entry: ConnEntry) {
        let id = entry.info.id;
        self.directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry.info.clone());
        self.live.insert(id, entry);
        HubStats::bump(&self.stats.connected);
        log::debug!("[Hub] {} connected ({} live)", id, self.live.len());
    }

    /// Drop `id` from the live set. Dropping the entry closes its mailbox, so
    /// this is the only place a mailbox is ever closed.
    fn remove(&mut self, id: ConnectionId) -> Option<ConnEntry> {
        let entry = self.live.remove(&id)?;
        self.directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        HubStats::bump(&self.stats.disconnected);
        Some(entry)
    }

    async fn dispatch(&mut self, request: Request) {
        HubStats::bump(&self.stats.requests);

        if !self.live.contains_key(&request.connection) {
            log::debug!(
                "[Hub] Dropping {}-byte request from departed {}",
                request.len(),
                request.connection
            );
            return;
        }

        let envelope = match Envelope::parse(&request.frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                HubStats::bump(&self.stats.protocol_violations);
                log::warn!(
                    "[Hub] Protocol violation from {}: {}; disconnecting",
                    request.connection,
                    e
                );
                self.remove(request.connection);
                return;
            }
        };

        let item = match self.invoke(&request, &envelope) {
            Ok(reply) => {
                HubStats::bump(&self.stats.replies);
                Outbound::Data(reply)
            }
            Err(status) => {
                log::debug!(
                    "[Hub] {}/{} for {} failed: {}",
                    envelope.service,
                    envelope.method,
                    request.connection,
                    status
                );
                match self.codec.marshal(&status) {
                    Ok(bytes) => {
                        HubStats::bump(&self.stats.error_replies);
                        Outbound::Status(bytes)
                    }
                    Err(e) => {
                        log::error!("[Hub] Failed to encode status: {}", e);
                        return;
                    }
                }
            }
        };

        self.deliver(request.connection, item).await;
    }

    /// Resolve, decode, call, and marshal. Every failure becomes a status.
    fn invoke(&self, request: &Request, envelope: &Envelope<'_>) -> Result<Bytes, Status> {
        let method = self.registry.lookup(envelope.service, envelope.method)?;
        if !method.info().is_unary() {
            return Err(Status::unimplemented(format!(
                "{}/{} is a streaming method",
                envelope.service, envelope.method
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(Status::cancelled("hub is shutting down"));
        }

        let ctx = CallContext::new(
            request.connection,
            envelope.service,
            envelope.method,
            request.received_at,
            self.cancel.child_token(),
        );
        let decoder = Decoder::new(&self.codec, envelope.payload);

        let reply = match panic::catch_unwind(AssertUnwindSafe(|| method.call(&ctx, &decoder))) {
            Ok(result) => result?,
            Err(_) => {
                log::error!(
                    "[Hub] Handler {}/{} panicked",
                    envelope.service,
                    envelope.method
                );
                return Err(Status::internal("handler panicked"));
            }
        };

        reply
            .marshal(&self.codec)
            .map_err(|e| Status::internal(format!("failed to encode reply: {e}")))
    }

    async fn broadcast(&mut self, payload: Bytes) {
        HubStats::bump(&self.stats.broadcasts);
        let targets: Vec<ConnectionId> = self.live.keys().copied().collect();
        for id in targets {
            self.deliver(id, Outbound::Data(payload.clone())).await;
        }
    }

    /// Enqueue `item` for `id`, evicting the connection if its mailbox is full.
    async fn deliver(&mut self, id: ConnectionId, item: Outbound) -> bool {
        let Some(entry) = self.live.get(&id) else {
            return false;
        };

        let outcome = match self.overflow {
            OverflowPolicy::Evict => match entry.mailbox.try_send(item) {
                Ok(()) => Delivery::Queued,
                Err(TrySendError::Full(_)) => Delivery::Full,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
            OverflowPolicy::Wait { timeout_ms } => {
                let wait = Duration::from_millis(timeout_ms);
                match tokio::time::timeout(wait, entry.mailbox.send(item)).await {
                    Ok(Ok(())) => Delivery::Queued,
                    Ok(Err(_)) => Delivery::Closed,
                    Err(_) => Delivery::Full,
                }
            }
        };

        match outcome {
            Delivery::Queued => true,
            Delivery::Full => {
                HubStats::bump(&self.stats.evicted);
                log::warn!("[Hub] Evicting slow consumer {}: mailbox full", id);
                self.remove(id);
                false
            }
            Delivery::Closed => {
                log::debug!("[Hub] {} outbound pump already gone", id);
                self.remove(id);
                false
            }
        }
    }

    /// Close every mailbox, give the outbound pumps `drain_timeout` to flush,
    /// then abort what is left.
    async fn drain(&mut self) {
        self.receivers.requests.close();
        self.receivers.broadcasts.close();

        while let Ok(entry) = self.receivers.connect.try_recv() {
            self.live.insert(entry.info.id, entry);
        }

        let mut writers: Vec<JoinHandle<()>> = self
            .live
            .drain()
            .map(|(_, entry)| {
                HubStats::bump(&self.stats.disconnected);
                entry.writer
            })
            .collect();
        self.directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let count = writers.len();
        let flush = async {
            for writer in &mut writers {
                let _ = writer.await;
            }
        };

        if tokio::time::timeout(self.drain_timeout, flush).await.is_err() {
            let stuck = writers.iter().filter(|w| !w.is_finished()).count();
            log::warn!(
                "[Hub] Drain timed out, aborting {} of {} outbound pumps",
                stuck,
                count
            );
            for writer in &writers {
                writer.abort();
            }
        }

        log::info!("[Hub] Event loop stopped ({} connections closed)", count);
    }
}
