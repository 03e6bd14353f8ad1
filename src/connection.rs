//! Per-connection duplex pump pair.
//!
//! Every upgraded WebSocket gets exactly one inbound task and one outbound
//! task; nothing else touches the socket, so neither half needs a lock.
//!
//! - **Inbound**: reads one message at a time under a liveness deadline and
//!   forwards data frames to the hub as requests. Whatever ends the loop
//!   (peer close, transport error, oversized frame, missed pong) it reports
//!   a disconnect to the hub.
//! - **Outbound**: drains the mailbox and sends a ping every ping period, each
//!   write bounded by the write deadline. When the hub closes the mailbox it
//!   sends a close frame and stops.
//!
//! The outbound task cancels the connection token when it exits, which stops
//! the inbound task; the inbound task does the same in the other direction.
//! The mailbox itself is only ever closed by the hub.

// Rust guideline compliant 2026-02

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::hub::events::{HubLink, Request};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Hub-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id, e.g. one read back from logs.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.as_u64())
    }
}

/// Diagnostic description of a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: ConnectionId,
    /// Remote address, when the transport has one.
    pub peer: Option<SocketAddr>,
    /// When the upgrade completed.
    pub connected_at: SystemTime,
}

/// Item in a connection's outbound mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    /// Reply or broadcast payload, sent as a binary message.
    Data(Bytes),
    /// Marshaled status, sent as a text message.
    Status(Bytes),
}

impl Outbound {
    fn into_message(self) -> Message {
        match self {
            Outbound::Data(bytes) => Message::Binary(bytes.to_vec()),
            Outbound::Status(bytes) => Message::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

/// Timing shared by both pumps.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PumpSettings {
    pub(crate) pong_wait: Duration,
    pub(crate) ping_period: Duration,
    pub(crate) write_wait: Duration,
}

impl From<&HubConfig> for PumpSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            write_wait: config.write_wait(),
        }
    }
}

/// Running outbound pump and the mailbox feeding it.
#[derive(Debug)]
pub(crate) struct OutboundPump {
    pub(crate) mailbox: mpsc::Sender<Outbound>,
    pub(crate) writer: JoinHandle<()>,
}

/// Inbound half waiting to be started.
///
/// Kept separate so the hub can register the connection before the first
/// request is read.
pub(crate) struct InboundPump<S> {
    id: ConnectionId,
    stream: SplitStream<WebSocketStream<S>>,
    settings: PumpSettings,
    closed: CancellationToken,
}

impl<S> fmt::Debug for InboundPump<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundPump")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Split `ws`, start its outbound pump, and return the inbound half unstarted.
pub(crate) fn start_outbound<S>(
    id: ConnectionId,
    ws: WebSocketStream<S>,
    mailbox_capacity: usize,
    settings: PumpSettings,
) -> (OutboundPump, InboundPump<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let (mailbox_tx, mailbox_rx) = mpsc::channel(mailbox_capacity.max(1));
    let closed = CancellationToken::new();

    let writer = tokio::spawn(write_loop(id, sink, mailbox_rx, settings, closed.clone()));

    (
        OutboundPump {
            mailbox: mailbox_tx,
            writer,
        },
        InboundPump {
            id,
            stream,
            settings,
            closed,
        },
    )
}

impl<S> InboundPump<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Start reading; requests and the final disconnect go to `link`.
    pub(crate) fn spawn(self, link: HubLink) -> JoinHandle<()> {
        tokio::spawn(read_loop(self.id, self.stream, self.settings, link, self.closed))
    }
}

/// Why an inbound loop ended.
#[derive(Debug)]
enum ReadExit {
    PeerClosed,
    StreamEnded,
    LivenessTimeout,
    Transport(tungstenite::Error),
    Violation(tungstenite::Error),
    WriterStopped,
    HubGone,
}

async fn read_loop<S>(
    id: ConnectionId,
    mut stream: SplitStream<WebSocketStream<S>>,
    settings: PumpSettings,
    link: HubLink,
    closed: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + settings.pong_wait;

    let exit = loop {
        let next = tokio::select! {
            () = closed.cancelled() => break ReadExit::WriterStopped,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => break ReadExit::LivenessTimeout,
            Ok(None) => break ReadExit::StreamEnded,
            Ok(Some(Err(e))) if is_violation(&e) => break ReadExit::Violation(e),
            Ok(Some(Err(e))) => break ReadExit::Transport(e),
            Ok(Some(Ok(message))) => message,
        };

        let frame = match message {
            Message::Binary(data) => Bytes::from(data),
            Message::Text(text) => Bytes::from(text),
            Message::Pong(_) => {
                deadline = Instant::now() + settings.pong_wait;
                continue;
            }
            Message::Close(_) => break ReadExit::PeerClosed,
            // Pings are answered by tungstenite itself.
            Message::Ping(_) | Message::Frame(_) => continue,
        };

        if !link.submit(Request::new(id, frame)).await {
            break ReadExit::HubGone;
        }
    };

    match &exit {
        ReadExit::PeerClosed | ReadExit::StreamEnded => {
            log::debug!("[Conn] {} closed by peer", id);
        }
        ReadExit::LivenessTimeout => {
            log::info!("[Conn] {} missed pong deadline, disconnecting", id);
        }
        ReadExit::Transport(e) => {
            log::debug!("[Conn] {} read error: {}", id, e);
        }
        ReadExit::Violation(e) => {
            link.protocol_violation();
            log::warn!("[Conn] {} protocol violation: {}", id, e);
        }
        ReadExit::WriterStopped => {
            log::debug!("[Conn] {} outbound pump stopped", id);
        }
        ReadExit::HubGone => {
            log::debug!("[Conn] {} hub no longer accepting requests", id);
        }
    }

    link.disconnect(id);
    // Once the hub stops taking requests it closes the mailbox itself, and
    // the outbound pump must stay up to flush what is queued.
    if !matches!(exit, ReadExit::HubGone) {
        closed.cancel();
    }
}

/// Errors caused by what the peer sent rather than by the transport.
fn is_violation(error: &tungstenite::Error) -> bool {
    use tokio_tungstenite::tungstenite::error::ProtocolError;

    match error {
        tungstenite::Error::Capacity(_) | tungstenite::Error::Utf8 => true,
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => false,
        tungstenite::Error::Protocol(_) => true,
        _ => false,
    }
}

/// Why a write failed.
#[derive(Debug)]
enum WriteError {
    Timeout,
    Transport(tungstenite::Error),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Timeout => f.write_str("write deadline exceeded"),
            WriteError::Transport(e) => write!(f, "{}", e),
        }
    }
}

async fn write_frame<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), WriteError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteError::Transport(e)),
        Err(_) => Err(WriteError::Timeout),
    }
}

async fn write_loop<S>(
    id: ConnectionId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut mailbox: mpsc::Receiver<Outbound>,
    settings: PumpSettings,
    closed: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker =
        tokio::time::interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            item = mailbox.recv() => {
                let Some(item) = item else {
                    // Mailbox closed by the hub.
                    if let Err(e) = write_frame(&mut sink, Message::Close(None), settings.write_wait).await {
                        log::debug!("[Conn] {} close frame not sent: {}", id, e);
                    }
                    break;
                };
                if let Err(e) = write_frame(&mut sink, item.into_message(), settings.write_wait).await {
                    log::debug!("[Conn] {} write failed: {}", id, e);
                    break;
                }
            }

            () = closed.cancelled() => break,

            _ = ticker.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Vec::new()), settings.write_wait).await {
                    log::debug!("[Conn] {} ping failed: {}", id, e);
                    break;
                }
            }
        }
    }

    closed.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::events::{self, Receivers, Senders};
    use crate::hub::stats::HubStats;
    use std::sync::Arc;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
    use tokio_tungstenite::tungstenite::protocol::frame::Frame;
    use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};

    struct Harness {
        _senders: Senders,
        receivers: Receivers,
        stats: Arc<HubStats>,
        mailbox: mpsc::Sender<Outbound>,
        peer: WebSocketStream<DuplexStream>,
        id: ConnectionId,
    }

    fn settings(pong_ms: u64, ping_ms: u64) -> PumpSettings {
        PumpSettings {
            pong_wait: Duration::from_millis(pong_ms),
            ping_period: Duration::from_millis(ping_ms),
            write_wait: Duration::from_secs(1),
        }
    }

    async fn harness(settings: PumpSettings, max_message: usize) -> Harness {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(max_message);
        ws_config.max_frame_size = Some(max_message);

        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, Some(ws_config)).await;
        let peer = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let stats = Arc::new(HubStats::default());
        let (senders, receivers) = events::channels(&HubConfig::default());
        let link = HubLink::new(&senders, &stats);

        let id = ConnectionId::next();
        let (outbound, inbound) = start_outbound(id, server, 8, settings);
        inbound.spawn(link);

        Harness {
            _senders: senders,
            receivers,
            stats,
            mailbox: outbound.mailbox,
            peer,
            id,
        }
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert_eq!(ConnectionId::from_raw(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::from_raw(7).as_u64(), 7);
    }

    #[test]
    fn test_outbound_message_kinds() {
        assert_eq!(
            Outbound::Data(Bytes::from_static(b"world")).into_message(),
            Message::Binary(b"world".to_vec())
        );
        assert_eq!(
            Outbound::Status(Bytes::from_static(b"{}")).into_message(),
            Message::Text("{}".to_string())
        );
    }

    #[tokio::test]
    async fn test_frames_forwarded_in_order() {
        let mut h = harness(settings(5_000, 4_000), 512).await;

        h.peer.send(Message::Binary(b"one".to_vec())).await.unwrap();
        h.peer.send(Message::Text("two".to_string())).await.unwrap();

        let first = h.receivers.requests.recv().await.unwrap();
        let second = h.receivers.requests.recv().await.unwrap();
        assert_eq!(first.connection, h.id);
        assert_eq!(first.frame.as_ref(), b"one");
        assert_eq!(second.frame.as_ref(), b"two");
        assert_eq!(second.len(), 3);
    }

    #[tokio::test]
    async fn test_peer_close_reports_disconnect() {
        let mut h = harness(settings(5_000, 4_000), 512).await;
        h.peer.close(None).await.unwrap();

        let gone = tokio::time::timeout(Duration::from_secs(2), h.receivers.disconnect.recv())
            .await
            .unwrap();
        assert_eq!(gone, Some(h.id));
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects() {
        let mut h = harness(settings(5_000, 4_000), 16).await;
        h.peer.send(Message::Binary(vec![0u8; 64])).await.unwrap();

        let gone = tokio::time::timeout(Duration::from_secs(2), h.receivers.disconnect.recv())
            .await
            .unwrap();
        assert_eq!(gone, Some(h.id));
        assert!(h.receivers.requests.try_recv().is_err());
        assert_eq!(
            h.stats
                .protocol_violations
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_counts_as_violation() {
        let mut h = harness(settings(5_000, 4_000), 512).await;
        let bad_text = Frame::message(vec![0xff, 0xfe, 0xfd], OpCode::Data(Data::Text), true);
        h.peer.send(Message::Frame(bad_text)).await.unwrap();

        let gone = tokio::time::timeout(Duration::from_secs(2), h.receivers.disconnect.recv())
            .await
            .unwrap();
        assert_eq!(gone, Some(h.id));
        assert!(h.receivers.requests.try_recv().is_err());
        assert_eq!(
            h.stats
                .protocol_violations
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_abrupt_reset_is_not_a_violation() {
        use tokio_tungstenite::tungstenite::error::{CapacityError, ProtocolError};

        assert!(is_violation(&tungstenite::Error::Utf8));
        assert!(is_violation(&tungstenite::Error::Capacity(
            CapacityError::MessageTooLong { size: 64, max_size: 16 }
        )));
        assert!(is_violation(&tungstenite::Error::Protocol(
            ProtocolError::UnmaskedFrameFromClient
        )));
        assert!(!is_violation(&tungstenite::Error::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        )));
        assert!(!is_violation(&tungstenite::Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_queue_flushed_after_hub_stops_taking_requests() {
        let mut h = harness(settings(5_000, 4_000), 512).await;

        // The hub is draining: its request queue is closed but the mailbox
        // is still open.
        h.receivers.requests.close();
        h.peer.send(Message::Binary(b"late".to_vec())).await.unwrap();
        let gone = tokio::time::timeout(Duration::from_secs(2), h.receivers.disconnect.recv())
            .await
            .unwrap();
        assert_eq!(gone, Some(h.id));

        h.mailbox
            .send(Outbound::Data(Bytes::from_static(b"queued")))
            .await
            .unwrap();
        drop(h.mailbox);

        let first = tokio::time::timeout(Duration::from_secs(2), h.peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first, Message::Binary(b"queued".to_vec()));
        let second = tokio::time::timeout(Duration::from_secs(2), h.peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(second, Message::Close(_)));
    }

    #[tokio::test]
    async fn test_mailbox_items_reach_peer_then_close_frame() {
        let mut h = harness(settings(5_000, 4_000), 512).await;

        h.mailbox
            .send(Outbound::Data(Bytes::from_static(b"world")))
            .await
            .unwrap();
        h.mailbox
            .send(Outbound::Status(Bytes::from_static(b"{\"code\":\"internal\"}")))
            .await
            .unwrap();
        drop(h.mailbox);

        let first = h.peer.next().await.unwrap().unwrap();
        assert_eq!(first, Message::Binary(b"world".to_vec()));
        let second = h.peer.next().await.unwrap().unwrap();
        assert!(matches!(second, Message::Text(_)));
        let third = h.peer.next().await.unwrap().unwrap();
        assert!(matches!(third, Message::Close(_)));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let started = std::time::Instant::now();
        // The peer never reads, so it never answers pings.
        let mut h = harness(settings(200, 150), 512).await;

        let gone = tokio::time::timeout(Duration::from_secs(3), h.receivers.disconnect.recv())
            .await
            .unwrap();
        assert_eq!(gone, Some(h.id));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_pongs_keep_connection_alive() {
        let mut h = harness(settings(300, 100), 512).await;

        // Reading drives tungstenite's automatic pong replies.
        let mut peer = h.peer;
        let reader = tokio::spawn(async move {
            while let Some(Ok(_)) = peer.next().await {}
        });

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(h.receivers.disconnect.try_recv().is_err());
        reader.abort();
    }
}
