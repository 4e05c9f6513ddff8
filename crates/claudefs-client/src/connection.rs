//! Per-connection guarded state and request submission.
//!
//! Every field touched by both the reply path and the timer path lives in
//! [`ConnState`] behind one lock. Replies are delivered on runtime workers;
//! the lock is never held while a call is submitted or awaited.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::frame::{CallFrame, FramePool};
use crate::handshake::HandshakePhase;
use crate::program::RpcProgram;
use crate::timer::{TimerHandle, TimerService};
use crate::transport::{RpcReply, RpcTransport};

/// State guarded by the connection lock.
#[derive(Debug)]
pub struct ConnState {
    pub connected: bool,
    pub connecting: bool,
    pub last_sent: Option<Instant>,
    pub last_received: Option<Instant>,
    pub ping_timer: Option<TimerHandle>,
    pub ping_started: bool,
    /// Calls submitted whose reply has not been delivered yet.
    pub saved_calls: u64,
    pub phase: HandshakePhase,
    /// Handshake attempt number; replies tagged with an older one are dropped.
    pub attempt: u64,
    /// Bumped on every disarm so a timer callback that already fired can
    /// tell it was superseded.
    pub ping_generation: u64,
}

impl Default for ConnState {
    fn default() -> Self {
        Self {
            connected: false,
            connecting: false,
            last_sent: None,
            last_received: None,
            ping_timer: None,
            ping_started: false,
            saved_calls: 0,
            phase: HandshakePhase::Disconnected,
            attempt: 0,
            ping_generation: 0,
        }
    }
}

impl ConnState {
    /// Cancels the ping timer if any and clears `ping_started`.
    pub fn disarm_ping(&mut self) {
        if let Some(timer) = self.ping_timer.take() {
            timer.cancel();
        }
        self.ping_started = false;
        self.ping_generation = self.ping_generation.wrapping_add(1);
    }

    /// Installs a freshly armed timer. The caller disarmed first.
    pub fn arm_ping(&mut self, timer: TimerHandle) {
        self.ping_timer = Some(timer);
        self.ping_started = true;
    }

    /// True if traffic in either direction happened less than `window` ago.
    pub fn active_within(&self, now: Instant, window: Duration) -> bool {
        let recent = |t: Option<Instant>| t.is_some_and(|t| now.saturating_duration_since(t) < window);
        recent(self.last_received) || recent(self.last_sent)
    }

    pub fn snapshot(&self) -> ConnSnapshot {
        ConnSnapshot {
            connected: self.connected,
            connecting: self.connecting,
            ping_started: self.ping_started,
            ping_timer_armed: self.ping_timer.as_ref().is_some_and(TimerHandle::is_armed),
            saved_calls: self.saved_calls,
            phase: self.phase,
            attempt: self.attempt,
        }
    }
}

/// Point-in-time copy of the connection flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnSnapshot {
    pub connected: bool,
    pub connecting: bool,
    pub ping_started: bool,
    pub ping_timer_armed: bool,
    pub saved_calls: u64,
    pub phase: HandshakePhase,
    pub attempt: u64,
}

/// One transport connection and its guarded state.
pub struct RpcConnection {
    transport: Arc<dyn RpcTransport>,
    state: Arc<Mutex<ConnState>>,
    frames: FramePool,
    timers: TimerService,
    runtime: Handle,
}

impl RpcConnection {
    pub fn new(transport: Arc<dyn RpcTransport>, frames: FramePool, runtime: Handle) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(ConnState::default())),
            frames,
            timers: TimerService::new(runtime.clone()),
            runtime,
        }
    }

    /// Takes the connection lock.
    pub fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock()
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    pub fn peer(&self) -> String {
        self.transport.peer_identifier()
    }

    /// Asks the transport to drop the connection.
    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    /// Submits a call and runs `on_reply` exactly once with the frame and
    /// the outcome, on a runtime worker.
    ///
    /// Returns true when the connection is up but keepalive has not been
    /// started, in which case the caller should start it. PING submissions
    /// always return false.
    pub fn submit<F>(&self, program: &RpcProgram, frame: CallFrame, payload: Bytes, on_reply: F) -> bool
    where
        F: FnOnce(CallFrame, RpcReply) + Send + 'static,
    {
        let is_ping = frame.procedure().is_ping();
        let needs_ping = {
            let mut state = self.state.lock();
            state.saved_calls += 1;
            state.last_sent = Some(Instant::now());
            !is_ping && state.connected && !state.ping_started
        };

        tracing::trace!(
            proc = %frame.procedure(),
            frame = frame.id(),
            program = %program,
            "submitting call"
        );

        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        let program = program.clone();
        self.runtime.spawn(async move {
            let procnum = frame.procedure().number();
            let reply = transport.call(&program, procnum, payload).await;
            {
                let mut state = state.lock();
                state.saved_calls = state.saved_calls.saturating_sub(1);
                if reply.is_ok() {
                    state.last_received = Some(Instant::now());
                }
            }
            on_reply(frame, reply);
        });

        needs_ping
    }
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("peer", &self.peer())
            .field("state", &self.state.lock().snapshot())
            .finish()
    }
}
