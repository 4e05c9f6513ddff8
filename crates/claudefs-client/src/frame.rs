//! Per-call frames.
//!
//! A [`CallFrame`] is created for every outgoing request and moved into the
//! reply path. Dropping it is the single release point for the call; since
//! the frame is owned by value there is no way to destroy it twice.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::program::ProcedureId;

#[derive(Debug, Default)]
struct PoolCounters {
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    in_flight: AtomicU64,
}

/// Snapshot of frame accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Frames handed out.
    pub created: u64,
    /// Frames released.
    pub destroyed: u64,
    /// Frames still owned by an in-flight call.
    pub in_flight: u64,
}

/// Allocates frames, bounded by an in-flight limit.
#[derive(Debug, Clone)]
pub struct FramePool {
    counters: Arc<PoolCounters>,
    limit: u64,
}

impl FramePool {
    /// `limit` of 0 means unbounded.
    pub fn new(limit: usize) -> Self {
        Self {
            counters: Arc::new(PoolCounters::default()),
            limit: limit as u64,
        }
    }

    /// Returns `None` when the pool is exhausted.
    pub fn create(&self, proc_id: ProcedureId) -> Option<CallFrame> {
        let c = &self.counters;
        let limit = self.limit;
        let reserved = c
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (limit == 0 || n < limit).then_some(n + 1)
            });
        if reserved.is_err() {
            tracing::debug!(proc = %proc_id, limit, "frame pool exhausted");
            return None;
        }
        c.created.fetch_add(1, Ordering::SeqCst);
        let id = c.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Some(CallFrame {
            id,
            proc_id,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            created: self.counters.created.load(Ordering::SeqCst),
            destroyed: self.counters.destroyed.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
        }
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Correlates one request with its reply.
pub struct CallFrame {
    id: u64,
    proc_id: ProcedureId,
    counters: Arc<PoolCounters>,
}

impl CallFrame {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn procedure(&self) -> ProcedureId {
        self.proc_id
    }

    /// Ends the call. Equivalent to dropping the frame; spelled out at the
    /// end of reply handlers so the release point is visible.
    pub fn destroy(self) {}
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFrame")
            .field("id", &self.id)
            .field("proc", &self.proc_id)
            .finish()
    }
}
