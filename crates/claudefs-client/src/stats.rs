//! Client handshake and keepalive counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of client counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientStatsSnapshot {
    /// PING requests submitted.
    pub pings_sent: u64,
    /// PING replies received.
    pub ping_replies: u64,
    /// Ping timer expiries that found the link silent.
    pub ping_timeouts: u64,
    /// Ping timer expiries that re-armed because of recent traffic.
    pub timer_rearms: u64,
    /// Disconnects forced by the keepalive.
    pub disconnects_forced: u64,
    /// Handshakes that reached the connected state.
    pub handshakes_completed: u64,
    /// Handshake attempts that ended in failure.
    pub handshakes_failed: u64,
    /// SETVOLUME rejections because of a stale volume file.
    pub stale_rejections: u64,
    /// Saved fds handed to the reopener after a handshake.
    pub fds_reopened: u64,
    /// Replies dropped because they belonged to an earlier attempt.
    pub stale_replies_dropped: u64,
}

/// Thread-safe client counters.
#[derive(Debug, Default)]
pub struct ClientStats {
    pings_sent: AtomicU64,
    ping_replies: AtomicU64,
    ping_timeouts: AtomicU64,
    timer_rearms: AtomicU64,
    disconnects_forced: AtomicU64,
    handshakes_completed: AtomicU64,
    handshakes_failed: AtomicU64,
    stale_rejections: AtomicU64,
    fds_reopened: AtomicU64,
    stale_replies_dropped: AtomicU64,
}

impl ClientStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pings_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ping_replies(&self) {
        self.ping_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ping_timeouts(&self) {
        self.ping_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timer_rearms(&self) {
        self.timer_rearms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_disconnects_forced(&self) {
        self.disconnects_forced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_handshakes_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_handshakes_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_rejections(&self) {
        self.stale_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fds_reopened(&self, n: u64) {
        self.fds_reopened.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_stale_replies_dropped(&self) {
        self.stale_replies_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            ping_replies: self.ping_replies.load(Ordering::Relaxed),
            ping_timeouts: self.ping_timeouts.load(Ordering::Relaxed),
            timer_rearms: self.timer_rearms.load(Ordering::Relaxed),
            disconnects_forced: self.disconnects_forced.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            stale_rejections: self.stale_rejections.load(Ordering::Relaxed),
            fds_reopened: self.fds_reopened.load(Ordering::Relaxed),
            stale_replies_dropped: self.stale_replies_dropped.load(Ordering::Relaxed),
        }
    }
}
