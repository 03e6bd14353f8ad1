//! Hub counters.
//!
//! Counters are bumped from the event loop and from connection pumps and read
//! by [`Hub::stats`](crate::Hub::stats) without touching the loop.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct HubStats {
    pub(crate) connected: AtomicU64,
    pub(crate) disconnected: AtomicU64,
    pub(crate) evicted: AtomicU64,
    pub(crate) requests: AtomicU64,
    pub(crate) replies: AtomicU64,
    pub(crate) error_replies: AtomicU64,
    pub(crate) protocol_violations: AtomicU64,
    pub(crate) broadcasts: AtomicU64,
}

impl HubStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, live: usize) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            live,
            connected: load(&self.connected),
            disconnected: load(&self.disconnected),
            evicted: load(&self.evicted),
            requests: load(&self.requests),
            replies: load(&self.replies),
            error_replies: load(&self.error_replies),
            protocol_violations: load(&self.protocol_violations),
            broadcasts: load(&self.broadcasts),
        }
    }
}

/// Point-in-time copy of the hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connections currently in the live set.
    pub live: usize,
    /// Connections ever added to the live set.
    pub connected: u64,
    /// Connections removed from the live set, for any reason.
    pub disconnected: u64,
    /// Connections removed because their mailbox was full.
    pub evicted: u64,
    /// Inbound request frames taken off the request queue.
    pub requests: u64,
    /// Successful replies enqueued.
    pub replies: u64,
    /// Status replies enqueued.
    pub error_replies: u64,
    /// Oversized frames, malformed envelopes and other wire violations.
    pub protocol_violations: u64,
    /// Broadcast payloads fanned out.
    pub broadcasts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let stats = HubStats::default();
        HubStats::bump(&stats.connected);
        HubStats::bump(&stats.connected);
        HubStats::bump(&stats.evicted);

        let snap = stats.snapshot(1);
        assert_eq!(snap.live, 1);
        assert_eq!(snap.connected, 2);
        assert_eq!(snap.evicted, 1);
        assert_eq!(snap.requests, 0);
    }
}
