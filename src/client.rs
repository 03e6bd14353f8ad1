//! Minimal hub client.
//!
//! [`connect`] performs the WebSocket handshake and returns split
//! ([`RpcWriter`], [`RpcReader`]) halves. The writer envelopes requests; the
//! reader classifies what comes back. Replies arrive in request order, so a
//! caller pairing calls with reads needs no correlation ids.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::codec::Codec;
use crate::envelope;
use crate::status::Status;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Something received from the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply or broadcast payload.
    Reply(Bytes),
    /// Error reply.
    Status(Status),
    /// The hub closed the connection.
    Closed,
}

impl Incoming {
    /// Decode a reply payload as `T`.
    ///
    /// # Errors
    ///
    /// Fails on a status, a closed connection, or a payload that is not a `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Incoming::Reply(bytes) => Codec::new()
                .unmarshal(&bytes)
                .context("failed to decode reply"),
            Incoming::Status(status) => Err(status.into()),
            Incoming::Closed => anyhow::bail!("connection closed"),
        }
    }
}

/// Write half of a client connection.
#[derive(Debug)]
pub struct RpcWriter {
    sink: SplitSink<WsStream, Message>,
    codec: Codec,
}

impl RpcWriter {
    /// Send a request for `service`/`method`.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be encoded or the send fails.
    pub async fn call<T: Serialize + ?Sized>(
        &mut self,
        service: &str,
        method: &str,
        request: &T,
    ) -> Result<()> {
        let payload = self
            .codec
            .marshal(request)
            .context("failed to encode request")?;
        let frame = envelope::encode(service, method, &payload)?;
        self.send_raw(frame).await
    }

    /// Send pre-built frame bytes as one binary message.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_raw(&mut self, frame: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Binary(frame))
            .await
            .context("WebSocket send failed")
    }

    /// Send a close frame and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a client connection.
#[derive(Debug)]
pub struct RpcReader {
    stream: SplitStream<WsStream>,
}

impl RpcReader {
    /// Wait for the next reply, status, or close.
    ///
    /// Pings are answered by the transport while reading, so a reader that
    /// keeps calling `recv` keeps the connection alive.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or an unparseable status message.
    pub async fn recv(&mut self) -> Result<Incoming> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Incoming::Reply(Bytes::from(data))),
                Some(Ok(Message::Text(text))) => {
                    let status: Status =
                        serde_json::from_str(&text).context("malformed status message")?;
                    return Ok(Incoming::Status(status));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(Incoming::Closed),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) => return Ok(Incoming::Closed),
                Some(Err(e)) => return Err(anyhow::anyhow!("WebSocket read error: {e}")),
            }
        }
    }
}

/// Connect to a hub at `url` with optional extra headers.
///
/// # Errors
///
/// Returns an error if the URL or a header is invalid, or the handshake fails
/// (including an origin refusal, which surfaces as an HTTP 403).
pub async fn connect(url: &str, headers: &[(&str, &str)]) -> Result<(RpcWriter, RpcReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();
    Ok((
        RpcWriter {
            sink,
            codec: Codec::new(),
        },
        RpcReader { stream },
    ))
}
