//! Ping keepalive.
//!
//! While calls are outstanding on a connected transport, one timer guards
//! liveness. If it expires and neither direction carried traffic during the
//! last full interval, the transport is disconnected. A PING reply re-arms
//! the cycle.
//!
//! Timer callbacks carry the `ping_generation` they were armed under and do
//! nothing if the connection has since disarmed, so a callback that fired
//! while a new timer was being armed never acts on the new timer.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;

use crate::client::ProtocolClient;
use crate::frame::CallFrame;
use crate::handshake::{transition, HandshakeEvent};
use crate::program::{HandshakeProc, ProcedureId, RpcProgram};
use crate::transport::RpcReply;

impl ProtocolClient {
    /// Arms the ping timer and sends a PING.
    ///
    /// No-op when keepalive is disabled, when the connection is down, or
    /// when no call is outstanding.
    pub fn start_ping(self: &Arc<Self>) {
        let timeout = self.config.ping_timeout();
        if timeout.is_zero() {
            return;
        }

        {
            let mut state = self.conn.lock();
            state.disarm_ping();

            if state.saved_calls == 0 || !state.connected {
                return;
            }

            let generation = state.ping_generation;
            let weak = Arc::downgrade(self);
            let timer = self.conn.timers().call_after(timeout, move || {
                if let Some(client) = weak.upgrade() {
                    client.on_ping_timeout(generation);
                }
            });
            match timer {
                Some(timer) => {
                    state.arm_ping(timer);
                    transition(&mut state, HandshakeEvent::PingArmed);
                }
                None => {
                    tracing::debug!(client = self.name(), "unable to setup ping timer");
                    return;
                }
            }
        }

        let Some(frame) = self
            .conn
            .frames()
            .create(ProcedureId::Handshake(HandshakeProc::Ping))
        else {
            tracing::debug!(client = self.name(), "failed to create frame for ping");
            return;
        };

        let program = self
            .config
            .handshake_program()
            .cloned()
            .unwrap_or_else(RpcProgram::handshake);
        self.stats.inc_pings_sent();
        let client = Arc::clone(self);
        self.submit_frame(&program, frame, Bytes::new(), move |frame, reply| {
            client.on_ping_reply(frame, reply);
        });
    }

    /// Timer expiry for the liveness window armed under `generation`.
    pub(crate) fn on_ping_timeout(self: &Arc<Self>, generation: u64) {
        let timeout = self.config.ping_timeout();
        let now = Instant::now();

        {
            let mut state = self.conn.lock();
            if state.ping_generation != generation {
                tracing::trace!(client = self.name(), "superseded ping timer fired");
                return;
            }

            state.disarm_ping();

            if state.active_within(now, timeout) {
                tracing::trace!(
                    client = self.name(),
                    "ping timer expired but transport activity detected - not bailing transport"
                );
                let generation = state.ping_generation;
                let weak = Arc::downgrade(self);
                match self.conn.timers().call_after(timeout, move || {
                    if let Some(client) = weak.upgrade() {
                        client.on_ping_timeout(generation);
                    }
                }) {
                    Some(timer) => {
                        state.arm_ping(timer);
                        self.stats.inc_timer_rearms();
                    }
                    None => {
                        tracing::debug!(client = self.name(), "unable to setup ping timer");
                    }
                }
                return;
            }
        }

        self.stats.inc_ping_timeouts();
        self.stats.inc_disconnects_forced();
        self.conn.disconnect();
        tracing::error!(
            client = self.name(),
            "Server {} has not responded in the last {} seconds, disconnecting.",
            self.conn.peer(),
            timeout.as_secs()
        );
    }

    /// Reply path of a PING.
    pub(crate) fn on_ping_reply(self: &Arc<Self>, frame: CallFrame, reply: RpcReply) {
        if let Err(e) = reply {
            tracing::debug!(client = self.name(), error = %e, "ping request bailed");
            frame.destroy();
            return;
        }
        self.stats.inc_ping_replies();

        let timeout = self.config.ping_timeout();
        {
            let mut state = self.conn.lock();
            state.disarm_ping();

            if state.connected {
                let generation = state.ping_generation;
                let weak = Arc::downgrade(self);
                match self.conn.timers().call_after(timeout, move || {
                    if let Some(client) = weak.upgrade() {
                        client.on_ping_interval(generation);
                    }
                }) {
                    Some(timer) => state.arm_ping(timer),
                    None => tracing::debug!(client = self.name(), "failed to set the ping timer"),
                }
            }
        }

        frame.destroy();
    }

    /// Expiry of the post-reply interval: start the next liveness check.
    fn on_ping_interval(self: &Arc<Self>, generation: u64) {
        if self.conn.lock().ping_generation != generation {
            return;
        }
        self.start_ping();
    }
}
