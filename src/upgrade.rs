//! HTTP upgrade and origin validation.
//!
//! An upgrade is accepted when the peer is on a loopback address (if
//! allowed by config) or when the `Origin` header names the same authority as
//! the `Host` header. Anything else is answered with `403 Forbidden` before
//! the WebSocket is established.

// Rust guideline compliant 2026-02

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::WebSocketStream;

use crate::config::HubConfig;

/// Failed upgrade.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The request's origin is not allowed for this host.
    #[error("origin {origin:?} not allowed for host {host:?}")]
    OriginRejected {
        /// `Origin` header, if any.
        origin: Option<String>,
        /// `Host` header, if any.
        host: Option<String>,
    },
    /// The peer did not finish the handshake in time.
    #[error("handshake not completed within {0:?}")]
    Timeout(Duration),
    /// The WebSocket handshake itself failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// Whether an upgrade request may proceed.
///
/// `origin` and `host` are the raw header values. The origin's scheme is
/// ignored and the authority compared with `host` case-insensitively.
pub fn origin_allowed(
    origin: Option<&str>,
    host: Option<&str>,
    peer: Option<SocketAddr>,
    allow_loopback: bool,
) -> bool {
    if allow_loopback && peer.is_some_and(|addr| addr.ip().is_loopback()) {
        return true;
    }
    let (Some(origin), Some(host)) = (origin, host) else {
        return false;
    };
    origin_authority(origin).is_some_and(|authority| authority.eq_ignore_ascii_case(host.trim()))
}

fn origin_authority(origin: &str) -> Option<&str> {
    let (_scheme, rest) = origin.trim().split_once("://")?;
    let authority = rest.split('/').next().unwrap_or_default();
    (!authority.is_empty()).then_some(authority)
}

/// WebSocket limits derived from the hub config.
pub(crate) fn ws_config(config: &HubConfig) -> WebSocketConfig {
    let mut ws = WebSocketConfig::default();
    ws.max_message_size = Some(config.max_frame_size);
    ws.max_frame_size = Some(config.max_frame_size);
    ws
}

/// Run the server side of the handshake on `stream`, bounded by the
/// configured handshake timeout.
pub(crate) async fn accept<S>(
    stream: S,
    peer: Option<SocketAddr>,
    config: &HubConfig,
) -> Result<WebSocketStream<S>, UpgradeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let allow_loopback = config.allow_loopback;
    let mut rejected: Option<(Option<String>, Option<String>)> = None;

    let callback = |request: &Request, response: Response| {
        let header_str = |name: header::HeaderName| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let origin = header_str(header::ORIGIN);
        let host = header_str(header::HOST);

        if origin_allowed(origin.as_deref(), host.as_deref(), peer, allow_loopback) {
            return Ok(response);
        }

        let mut denied = ErrorResponse::new(Some("origin not allowed".to_string()));
        *denied.status_mut() = StatusCode::FORBIDDEN;
        rejected = Some((origin, host));
        Err(denied)
    };

    let deadline = config.handshake_timeout();
    let handshake =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config(config)));
    let Ok(result) = tokio::time::timeout(deadline, handshake).await else {
        return Err(UpgradeError::Timeout(deadline));
    };

    match (result, rejected) {
        (Ok(ws), _) => Ok(ws),
        (Err(_), Some((origin, host))) => Err(UpgradeError::OriginRejected { origin, host }),
        (Err(e), None) => Err(UpgradeError::Handshake(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> Option<SocketAddr> {
        Some("203.0.113.9:50000".parse().unwrap())
    }

    fn local() -> Option<SocketAddr> {
        Some("127.0.0.1:50000".parse().unwrap())
    }

    #[test]
    fn test_same_origin_accepted() {
        assert!(origin_allowed(
            Some("https://chat.example.com"),
            Some("chat.example.com"),
            remote(),
            false
        ));
        assert!(origin_allowed(
            Some("http://Chat.Example.com:8080/"),
            Some("chat.example.com:8080"),
            remote(),
            false
        ));
    }

    #[test]
    fn test_cross_origin_rejected() {
        assert!(!origin_allowed(
            Some("https://evil.example"),
            Some("chat.example.com"),
            remote(),
            true
        ));
        assert!(!origin_allowed(
            Some("https://chat.example.com:9090"),
            Some("chat.example.com:8080"),
            remote(),
            true
        ));
    }

    #[test]
    fn test_missing_or_opaque_origin_rejected() {
        assert!(!origin_allowed(None, Some("chat.example.com"), remote(), true));
        assert!(!origin_allowed(Some("null"), Some("chat.example.com"), remote(), true));
        assert!(!origin_allowed(Some("https://chat.example.com"), None, remote(), true));
    }

    #[test]
    fn test_loopback_bypass_follows_config() {
        assert!(origin_allowed(None, None, local(), true));
        assert!(!origin_allowed(None, None, local(), false));
        assert!(origin_allowed(None, None, Some("[::1]:4000".parse().unwrap()), true));
    }

    #[test]
    fn test_ws_config_uses_frame_limit() {
        let config = HubConfig {
            max_frame_size: 1024,
            ..HubConfig::default()
        };
        let ws = ws_config(&config);
        assert_eq!(ws.max_message_size, Some(1024));
        assert_eq!(ws.max_frame_size, Some(1024));
    }

    #[tokio::test]
    async fn test_silent_peer_hits_handshake_timeout() {
        let config = HubConfig {
            handshake_timeout_ms: 50,
            ..HubConfig::default()
        };
        let (server, _client) = tokio::io::duplex(1024);

        let err = tokio::time::timeout(Duration::from_secs(2), accept(server, local(), &config))
            .await
            .expect("accept should give up on its own")
            .unwrap_err();
        assert!(matches!(err, UpgradeError::Timeout(d) if d == Duration::from_millis(50)));
    }
}
