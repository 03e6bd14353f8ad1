//! Hub configuration.
//!
//! [`HubConfig`] is serde-backed so it can be embedded in an application's
//! own config file, and can be adjusted through `WSRPC_*` environment
//! variables. Durations are stored as milliseconds.

// Rust guideline compliant 2026-02

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default outbound mailbox capacity per connection.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
/// Default maximum inbound message size, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512;
/// Default time allowed for the peer to acknowledge a liveness probe.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
/// Default time allowed for a single frame write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
/// Default time allowed for a client to complete the WebSocket handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the hub does when a connection's mailbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Disconnect the connection immediately.
    #[default]
    Evict,
    /// Wait up to `timeout_ms` for room, then disconnect.
    ///
    /// Stalls the event loop for the wait, so keep it short.
    Wait {
        /// Maximum wait in milliseconds.
        timeout_ms: u64,
    },
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A queue or size limit is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// Probes would not arrive before the acknowledgment window closes.
    #[error("ping period ({ping_ms}ms) must be shorter than pong wait ({pong_ms}ms)")]
    PingPeriodTooLong {
        /// Effective ping period.
        ping_ms: u64,
        /// Configured pong wait.
        pong_ms: u64,
    },
}

/// Tunables for a [`Hub`](crate::Hub) and its connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound mailbox capacity per connection.
    pub mailbox_capacity: usize,
    /// Largest inbound message accepted; bigger ones drop the connection.
    pub max_frame_size: usize,
    /// Acknowledgment window for liveness probes, in milliseconds.
    pub pong_wait_ms: u64,
    /// Probe interval in milliseconds. `None` means 9/10 of the pong wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_period_ms: Option<u64>,
    /// Deadline for a single frame write, in milliseconds.
    pub write_wait_ms: u64,
    /// Deadline for the upgrade handshake after a TCP accept, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Capacity of the inbound request queue shared by all connections.
    pub request_queue: usize,
    /// Capacity of the broadcast queue.
    pub broadcast_queue: usize,
    /// How long shutdown waits for outbound pumps to flush, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Mailbox overflow handling.
    pub overflow: OverflowPolicy,
    /// Accept upgrades from loopback peers regardless of origin.
    pub allow_loopback: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pong_wait_ms: duration_ms(DEFAULT_PONG_WAIT),
            ping_period_ms: None,
            write_wait_ms: duration_ms(DEFAULT_WRITE_WAIT),
            handshake_timeout_ms: duration_ms(DEFAULT_HANDSHAKE_TIMEOUT),
            request_queue: 256,
            broadcast_queue: 64,
            drain_timeout_ms: 5_000,
            overflow: OverflowPolicy::Evict,
            allow_loopback: true,
        }
    }
}

impl HubConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `WSRPC_*` environment variables on top of the current values.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parse_usize = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(capacity) = parse_usize("WSRPC_MAILBOX_CAPACITY") {
            self.mailbox_capacity = capacity;
        }
        if let Some(size) = parse_usize("WSRPC_MAX_FRAME_SIZE") {
            self.max_frame_size = size;
        }
        if let Some(ms) = parse_u64("WSRPC_PONG_WAIT_MS") {
            self.pong_wait_ms = ms;
        }
        if let Some(ms) = parse_u64("WSRPC_WRITE_WAIT_MS") {
            self.write_wait_ms = ms;
        }
        if let Some(ms) = parse_u64("WSRPC_HANDSHAKE_TIMEOUT_MS") {
            self.handshake_timeout_ms = ms;
        }
    }

    /// Check that the values are usable together.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("mailbox_capacity", self.mailbox_capacity),
            ("max_frame_size", self.max_frame_size),
            ("request_queue", self.request_queue),
            ("broadcast_queue", self.broadcast_queue),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.pong_wait_ms == 0 {
            return Err(ConfigError::Zero("pong_wait_ms"));
        }
        if self.write_wait_ms == 0 {
            return Err(ConfigError::Zero("write_wait_ms"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Zero("handshake_timeout_ms"));
        }
        let ping_ms = duration_ms(self.ping_period());
        if ping_ms == 0 || ping_ms >= self.pong_wait_ms {
            return Err(ConfigError::PingPeriodTooLong {
                ping_ms,
                pong_ms: self.pong_wait_ms,
            });
        }
        Ok(())
    }

    /// Acknowledgment window for liveness probes.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Interval between liveness probes.
    pub fn ping_period(&self) -> Duration {
        match self.ping_period_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.pong_wait() * 9 / 10,
        }
    }

    /// Per-write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Upgrade handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Shutdown flush allowance.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_values() {
        let config = HubConfig::default();
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.max_frame_size, 512);
        assert_eq!(config.pong_wait(), Duration::from_secs(60));
        assert_eq!(config.ping_period(), Duration::from_secs(54));
        assert_eq!(config.write_wait(), Duration::from_secs(10));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.overflow, OverflowPolicy::Evict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_ping_period() {
        let config = HubConfig {
            ping_period_ms: Some(100),
            pong_wait_ms: 500,
            ..HubConfig::default()
        };
        assert_eq!(config.ping_period(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_ping_not_shorter_than_pong() {
        let config = HubConfig {
            ping_period_ms: Some(500),
            pong_wait_ms: 500,
            ..HubConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::PingPeriodTooLong {
                ping_ms: 500,
                pong_ms: 500
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = HubConfig {
            mailbox_capacity: 0,
            ..HubConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("mailbox_capacity")));
    }

    #[test]
    fn test_overrides_apply_parseable_values_only() {
        let vars: HashMap<&str, &str> = [
            ("WSRPC_MAILBOX_CAPACITY", "8"),
            ("WSRPC_MAX_FRAME_SIZE", "not-a-number"),
            ("WSRPC_PONG_WAIT_MS", " 2000 "),
            ("WSRPC_HANDSHAKE_TIMEOUT_MS", "750"),
        ]
        .into_iter()
        .collect();

        let mut config = HubConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.pong_wait_ms, 2000);
        assert_eq!(config.ping_period(), Duration::from_millis(1800));
        assert_eq!(config.handshake_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_validate_rejects_zero_handshake_timeout() {
        let config = HubConfig {
            handshake_timeout_ms: 0,
            ..HubConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("handshake_timeout_ms"))
        );
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: HubConfig = serde_json::from_str(
            r#"{"mailbox_capacity": 16, "overflow": {"policy": "wait", "timeout_ms": 50}}"#,
        )
        .unwrap();
        assert_eq!(config.mailbox_capacity, 16);
        assert_eq!(config.overflow, OverflowPolicy::Wait { timeout_ms: 50 });
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }
}
