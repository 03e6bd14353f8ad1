//! Connection hub.
//!
//! A [`Hub`] is created inactive, collects service registrations, and becomes
//! active when [`Hub::start`] spawns its event loop. From then on the registry
//! is read-only and every cross-connection state change (connect, disconnect,
//! request dispatch, broadcast) happens on that one loop.
//!
//! # Lifecycle
//!
//! ```text
//! new ──register_service*──▶ start ──handle_upgrade*/broadcast*──▶ shutdown
//!  (inactive)                 (active)                              (drained)
//! ```
//!
//! `Hub` is a cheap handle; clones share the same hub.

// Rust guideline compliant 2026-02

pub(crate) mod events;
mod event_loop;
pub(crate) mod stats;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::config::{ConfigError, HubConfig};
use crate::connection::{self, ConnectionId, ConnectionInfo, PumpSettings};
use crate::registry::{RegistrationError, Registry, ServiceDescriptor, ServiceInfo};
use crate::upgrade::{self, UpgradeError};
use event_loop::{Directory, EventLoop};
use events::{ConnEntry, HubLink, Receivers, Senders};
use stats::HubStats;

pub use stats::StatsSnapshot;

/// Hub lifecycle or connection failure.
#[derive(Debug, Error)]
pub enum HubError {
    /// [`Hub::start`] was called on a running hub.
    #[error("hub already started")]
    AlreadyStarted,
    /// The hub has been shut down.
    #[error("hub is stopped")]
    Stopped,
    /// The broadcast queue has no room right now.
    #[error("broadcast queue is full")]
    BroadcastQueueFull,
    /// The configuration is unusable.
    #[error("invalid hub config: {0}")]
    Config(#[from] ConfigError),
    /// The upgrade request was refused or the handshake failed.
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
}

enum Lifecycle {
    Inactive {
        registry: Registry,
        receivers: Receivers,
    },
    Active(Arc<Registry>),
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Inactive { registry, .. } => f
                .debug_struct("Inactive")
                .field("services", &registry.len())
                .finish_non_exhaustive(),
            Lifecycle::Active(registry) => f
                .debug_tuple("Active")
                .field(&registry.len())
                .finish(),
        }
    }
}

#[derive(Debug)]
struct HubInner {
    config: HubConfig,
    senders: Senders,
    lifecycle: Mutex<Lifecycle>,
    directory: Directory,
    stats: Arc<HubStats>,
    codec: Arc<Codec>,
    cancel: CancellationToken,
}

/// Handle to an RPC hub.
#[derive(Debug, Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create an inactive hub with no services.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] if `config` fails validation.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        config.validate()?;
        let (senders, receivers) = events::channels(&config);
        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                senders,
                lifecycle: Mutex::new(Lifecycle::Inactive {
                    registry: Registry::new(),
                    receivers,
                }),
                directory: Arc::new(RwLock::new(HashMap::new())),
                stats: Arc::new(HubStats::default()),
                codec: Arc::new(Codec::new()),
                cancel: CancellationToken::new(),
            }),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `implementation` under `descriptor`.
    ///
    /// # Errors
    ///
    /// Fails once the hub is active, and for empty or duplicate names. A
    /// failed call leaves the registry unchanged.
    pub fn register_service<S>(
        &self,
        descriptor: ServiceDescriptor<S>,
        implementation: Arc<S>,
    ) -> Result<(), RegistrationError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        match &mut *self.lifecycle() {
            Lifecycle::Inactive { registry, .. } => {
                let name = descriptor.name.clone();
                registry.insert(descriptor, implementation)?;
                log::info!("[Hub] Registered service {}", name);
                Ok(())
            }
            Lifecycle::Active(_) => {
                log::warn!(
                    "[Hub] Rejected registration of {} after activation",
                    descriptor.name
                );
                Err(RegistrationError::HubActive(descriptor.name))
            }
        }
    }

    /// Spawn the event loop. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<JoinHandle<()>, HubError> {
        let mut state = self.lifecycle();
        let (registry, receivers) =
            match mem::replace(&mut *state, Lifecycle::Active(Arc::default())) {
                Lifecycle::Inactive {
                    registry,
                    receivers,
                } => (Arc::new(registry), receivers),
                active @ Lifecycle::Active(_) => {
                    *state = active;
                    return Err(HubError::AlreadyStarted);
                }
            };
        *state = Lifecycle::Active(Arc::clone(&registry));
        drop(state);

        let event_loop = EventLoop {
            receivers,
            registry,
            codec: Arc::clone(&self.inner.codec),
            directory: Arc::clone(&self.inner.directory),
            stats: Arc::clone(&self.inner.stats),
            overflow: self.inner.config.overflow,
            drain_timeout: self.inner.config.drain_timeout(),
            cancel: self.inner.cancel.clone(),
            live: HashMap::new(),
        };
        Ok(tokio::spawn(event_loop.run()))
    }

    /// Whether the event loop has started and not been shut down.
    pub fn is_active(&self) -> bool {
        !self.inner.cancel.is_cancelled() && matches!(*self.lifecycle(), Lifecycle::Active(_))
    }

    /// Upgrade an accepted byte stream and hand the connection to the hub.
    ///
    /// Runs the origin check and WebSocket handshake, starts the pump pair,
    /// and queues the connect event before the first frame is read.
    ///
    /// # Errors
    ///
    /// [`HubError::Stopped`] after shutdown, [`HubError::Upgrade`] if the
    /// origin is refused or the handshake fails.
    pub async fn handle_upgrade<S>(
        &self,
        stream: S,
        peer: Option<SocketAddr>,
    ) -> Result<ConnectionId, HubError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.inner.cancel.is_cancelled() {
            return Err(HubError::Stopped);
        }

        let config = &self.inner.config;
        let ws = match upgrade::accept(stream, peer, config).await {
            Ok(ws) => ws,
            Err(e) => {
                log::warn!("[Upgrade] Refused {}: {}", display_peer(peer), e);
                return Err(e.into());
            }
        };

        let id = ConnectionId::next();
        let (outbound, inbound) = connection::start_outbound(
            id,
            ws,
            config.mailbox_capacity,
            PumpSettings::from(config),
        );
        let entry = ConnEntry {
            info: ConnectionInfo {
                id,
                peer,
                connected_at: SystemTime::now(),
            },
            mailbox: outbound.mailbox,
            writer: outbound.writer,
        };

        // A refused entry is dropped here, which closes its mailbox.
        if self.inner.cancel.is_cancelled() || self.inner.senders.connect.send(entry).is_err() {
            return Err(HubError::Stopped);
        }

        inbound.spawn(HubLink::new(&self.inner.senders, &self.inner.stats));
        log::info!("[Hub] {} connected from {}", id, display_peer(peer));
        Ok(id)
    }

    /// Accept TCP connections from `listener` until the hub shuts down.
    ///
    /// Each accepted stream is upgraded on its own task; refused upgrades are
    /// logged and do not stop the loop.
    pub async fn serve(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            log::info!("[Hub] Listening on ws://{}", addr);
        }

        loop {
            let accepted = tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let hub = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = hub.handle_upgrade(stream, Some(addr)).await {
                            log::debug!("[Hub] Upgrade from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("[Hub] Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }

        log::info!("[Hub] Accept loop stopped");
    }

    /// Queue `payload` for every live connection, waiting for queue room.
    ///
    /// Empty payloads are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] after shutdown.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Ok(());
        }
        if self.inner.cancel.is_cancelled() {
            return Err(HubError::Stopped);
        }
        self.inner
            .senders
            .broadcasts
            .send(payload)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Queue `payload` for every live connection without waiting.
    ///
    /// # Errors
    ///
    /// [`HubError::BroadcastQueueFull`] when the queue has no room,
    /// [`HubError::Stopped`] after shutdown.
    pub fn try_broadcast(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Ok(());
        }
        if self.inner.cancel.is_cancelled() {
            return Err(HubError::Stopped);
        }
        self.inner
            .senders
            .broadcasts
            .try_send(payload)
            .map_err(|e| match e {
                TrySendError::Full(_) => HubError::BroadcastQueueFull,
                TrySendError::Closed(_) => HubError::Stopped,
            })
    }

    /// Snapshot of the live connections, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self
            .inner
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        let live = self
            .inner
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        self.inner.stats.snapshot(live)
    }

    /// Registered services, before or after activation.
    pub fn describe(&self) -> BTreeMap<String, ServiceInfo> {
        match &*self.lifecycle() {
            Lifecycle::Inactive { registry, .. } => registry.describe(),
            Lifecycle::Active(registry) => registry.describe(),
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Stop the hub. The event loop closes every mailbox, waits up to the
    /// drain timeout for outbound pumps to flush, then exits.
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            log::info!("[Hub] Shutting down");
            self.inner.cancel.cancel();
        }
    }
}

fn display_peer(peer: Option<SocketAddr>) -> String {
    peer.map_or_else(|| "unknown peer".to_string(), |addr| addr.to_string())
}
