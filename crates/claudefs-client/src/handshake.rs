//! Handshake orchestration.
//!
//! The handshake is a state machine over [`ConnState`]: each reply handler
//! feeds one [`HandshakeEvent`] into [`transition`] under the connection
//! lock and gets back the [`HandshakeAction`]s to perform once the lock is
//! released. The sequence is
//!
//! ```text
//! Disconnected -> Probing -> Negotiated -> SettingVolume -> Connected -> PingActive
//! ```
//!
//! with `SettingVolume` falling to `Connecting` or `StaleConfig`, and
//! `Probing` to `Failed`. Nothing here retries; the next transport connect
//! starts a new attempt from scratch.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::client::ProtocolClient;
use crate::connection::ConnState;
use crate::error::{ClientError, Result};
use crate::frame::CallFrame;
use crate::message::{DumpReply, DumpRequest};
use crate::negotiate::NegotiatedPrograms;
use crate::notify::ParentEvent;
use crate::program::{DumpProc, HandshakeProc, ProcedureId};
use crate::recovery;
use crate::setvolume::{self, SetVolumeOutcome};
use crate::transport::RpcReply;

/// Where a connection is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HandshakePhase {
    Disconnected,
    /// DUMP sent, waiting for the program list.
    Probing,
    /// Programs chosen, SETVOLUME being built.
    Negotiated,
    /// SETVOLUME sent, waiting for the reply.
    SettingVolume,
    Connected,
    /// Connected with keepalive armed.
    PingActive,
    /// SETVOLUME failed; waiting for the transport to reconnect.
    Connecting,
    /// The server rejected our volume file as outdated.
    StaleConfig,
    /// No common program; this attempt is over.
    Failed,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakePhase::Disconnected => "disconnected",
            HandshakePhase::Probing => "probing",
            HandshakePhase::Negotiated => "negotiated",
            HandshakePhase::SettingVolume => "setting-volume",
            HandshakePhase::Connected => "connected",
            HandshakePhase::PingActive => "ping-active",
            HandshakePhase::Connecting => "connecting",
            HandshakePhase::StaleConfig => "stale-config",
            HandshakePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Inputs to the state machine.
#[derive(Debug)]
pub enum HandshakeEvent {
    /// The transport connected; starts a new attempt.
    TransportConnected,
    /// DUMP reply processed, with the negotiation result.
    ProbeReplied(Result<NegotiatedPrograms>),
    /// SETVOLUME went out.
    SetVolumeSubmitted,
    /// SETVOLUME reply processed, or the request could not be sent.
    SetVolumeReplied(SetVolumeOutcome),
    /// Keepalive armed its first timer.
    PingArmed,
    /// The transport went away.
    TransportDisconnected,
}

/// Side effects requested by a transition, run outside the lock.
#[derive(Debug)]
pub enum HandshakeAction {
    SendProbe,
    SendSetVolume(NegotiatedPrograms),
    /// Reopen saved fds and send CHILD_UP.
    RunRecovery,
    StartPing,
    Notify(ParentEvent),
    InvalidateFds,
    /// The attempt ended without a usable connection.
    Abort(ClientError),
}

/// Applies `event` to `state`.
///
/// Events that do not fit the current phase are ignored; this is how late
/// replies on a torn-down connection terminate.
pub fn transition(state: &mut ConnState, event: HandshakeEvent) -> Vec<HandshakeAction> {
    use HandshakeAction as A;
    use HandshakePhase as P;

    let from = state.phase;
    let actions = match (from, event) {
        (_, HandshakeEvent::TransportConnected) => {
            // A connect while still up means the old link is gone.
            let was_connected = state.connected;
            state.disarm_ping();
            state.connected = false;
            state.attempt = state.attempt.wrapping_add(1);
            state.phase = P::Probing;
            if was_connected {
                vec![A::InvalidateFds, A::SendProbe]
            } else {
                vec![A::SendProbe]
            }
        }

        (P::Probing, HandshakeEvent::ProbeReplied(Ok(negotiated))) => {
            state.phase = P::Negotiated;
            vec![A::SendSetVolume(negotiated)]
        }
        (P::Probing, HandshakeEvent::ProbeReplied(Err(err))) => {
            state.phase = P::Failed;
            vec![A::Abort(err)]
        }

        (P::Negotiated, HandshakeEvent::SetVolumeSubmitted) => {
            state.phase = P::SettingVolume;
            Vec::new()
        }

        (P::Negotiated | P::SettingVolume, HandshakeEvent::SetVolumeReplied(outcome)) => {
            match outcome {
                SetVolumeOutcome::Accepted { .. } => {
                    state.connected = true;
                    state.connecting = false;
                    state.phase = P::Connected;
                    vec![A::RunRecovery, A::StartPing]
                }
                SetVolumeOutcome::Stale { message } => {
                    state.connecting = false;
                    state.phase = P::StaleConfig;
                    vec![
                        A::Notify(ParentEvent::VolfileModified),
                        A::Abort(ClientError::StaleConfig { message }),
                    ]
                }
                other => {
                    state.connecting = true;
                    state.phase = P::Connecting;
                    let err = other
                        .into_error()
                        .unwrap_or_else(|| ClientError::transport("setvolume failed"));
                    vec![A::Notify(ParentEvent::ChildConnecting), A::Abort(err)]
                }
            }
        }

        (P::Connected, HandshakeEvent::PingArmed) => {
            state.phase = P::PingActive;
            Vec::new()
        }

        (_, HandshakeEvent::TransportDisconnected) => {
            state.disarm_ping();
            state.connected = false;
            state.phase = P::Disconnected;
            state.attempt = state.attempt.wrapping_add(1);
            vec![A::InvalidateFds]
        }

        (_, HandshakeEvent::PingArmed) => Vec::new(),

        (phase, event) => {
            tracing::trace!(phase = %phase, event = ?event, "event ignored in this phase");
            Vec::new()
        }
    };

    if state.phase != from {
        tracing::debug!(from = %from, to = %state.phase, attempt = state.attempt, "handshake transition");
    }
    actions
}

impl ProtocolClient {
    /// Starts a handshake on a freshly connected transport.
    ///
    /// Returns the attempt number, or `None` when the handshake program is
    /// not configured for this client.
    pub fn handshake(self: &Arc<Self>) -> Option<u64> {
        if self.config.handshake_program().is_none() {
            tracing::debug!(client = self.name(), "handshake disabled");
            return None;
        }

        let (attempt, actions) = {
            let mut state = self.conn.lock();
            let actions = transition(&mut state, HandshakeEvent::TransportConnected);
            (state.attempt, actions)
        };
        self.run_actions(attempt, actions);
        Some(attempt)
    }

    /// Transport-disconnect notification from the connection manager.
    pub fn handle_disconnect(self: &Arc<Self>) {
        let (attempt, actions) = {
            let mut state = self.conn.lock();
            let actions = transition(&mut state, HandshakeEvent::TransportDisconnected);
            (state.attempt, actions)
        };
        tracing::info!(client = self.name(), peer = %self.conn.peer(), "disconnected");
        self.run_actions(attempt, actions);
    }

    /// Feeds an event for `attempt`. Events of an older attempt are dropped.
    pub(crate) fn apply(self: &Arc<Self>, attempt: u64, event: HandshakeEvent) {
        let actions = {
            let mut state = self.conn.lock();
            if state.attempt != attempt {
                tracing::trace!(
                    attempt,
                    current = state.attempt,
                    event = ?event,
                    "dropping event of an earlier handshake attempt"
                );
                self.stats.inc_stale_replies_dropped();
                return;
            }
            transition(&mut state, event)
        };
        self.run_actions(attempt, actions);
    }

    fn run_actions(self: &Arc<Self>, attempt: u64, actions: Vec<HandshakeAction>) {
        for action in actions {
            match action {
                HandshakeAction::SendProbe => self.send_probe(attempt),
                HandshakeAction::SendSetVolume(negotiated) => {
                    self.send_setvolume(attempt, negotiated)
                }
                HandshakeAction::RunRecovery => {
                    self.stats.inc_handshakes_completed();
                    let reopened = recovery::post_handshake(
                        &self.config,
                        self.reopener.as_ref(),
                        &self.parents,
                        self.name(),
                    );
                    self.stats.add_fds_reopened(reopened as u64);
                }
                HandshakeAction::StartPing => self.start_ping(),
                HandshakeAction::Notify(event) => self.parents.notify_all(event, self.name()),
                HandshakeAction::InvalidateFds => self.config.lock().saved_fds.invalidate_all(),
                HandshakeAction::Abort(err) => {
                    if matches!(err, ClientError::StaleConfig { .. }) {
                        self.stats.inc_stale_rejections();
                    }
                    self.stats.inc_handshakes_failed();
                    tracing::debug!(client = self.name(), attempt, error = %err, "handshake attempt ended");
                }
            }
        }
    }

    fn send_probe(self: &Arc<Self>, attempt: u64) {
        let Some(dump) = self.config.dump_program().cloned() else {
            self.apply(attempt, HandshakeEvent::ProbeReplied(Err(ClientError::HandshakeDisabled)));
            return;
        };
        let Some(frame) = self.conn.frames().create(ProcedureId::Dump(DumpProc::Dump)) else {
            self.apply(
                attempt,
                HandshakeEvent::ProbeReplied(Err(ClientError::ResourceExhausted { what: "frame" })),
            );
            return;
        };

        let payload = DumpRequest::default().encode();
        let client = Arc::clone(self);
        self.submit_frame(&dump, frame, payload, move |frame, reply| {
            client.on_probe_reply(attempt, frame, reply);
        });
    }

    fn on_probe_reply(self: &Arc<Self>, attempt: u64, frame: CallFrame, reply: RpcReply) {
        let result = self.negotiate_from_reply(reply);
        self.apply(attempt, HandshakeEvent::ProbeReplied(result));
        frame.destroy();
    }

    fn negotiate_from_reply(&self, reply: RpcReply) -> Result<NegotiatedPrograms> {
        let buf = reply.map_err(|e| {
            tracing::warn!(client = self.name(), error = %e, "some error, retry again later");
            e
        })?;
        let rsp = DumpReply::decode(&buf).map_err(|e| {
            tracing::error!(client = self.name(), error = %e, "failed to decode DUMP reply");
            e
        })?;
        if rsp.op_ret == -1 {
            tracing::error!(client = self.name(), "failed to get the 'versions' from server");
            return Err(ClientError::ServerRejected {
                op_errno: rsp.op_errno,
                message: "DUMP failed".to_string(),
            });
        }
        self.config.negotiator().select(&rsp.programs).map_err(|e| {
            tracing::error!(client = self.name(), "Server versions are not present in this release");
            e
        })
    }

    fn send_setvolume(self: &Arc<Self>, attempt: u64, negotiated: NegotiatedPrograms) {
        self.config.set_negotiated(negotiated.clone());

        let submitted = (|| -> Result<()> {
            let program = self
                .config
                .handshake_program()
                .cloned()
                .ok_or(ClientError::HandshakeDisabled)?;
            let payload = setvolume::build_request(&self.config, &negotiated)?.encode()?;
            let frame = self
                .conn
                .frames()
                .create(ProcedureId::Handshake(HandshakeProc::SetVolume))
                .ok_or(ClientError::ResourceExhausted { what: "frame" })?;

            // Move to SettingVolume before the reply can race us.
            self.apply(attempt, HandshakeEvent::SetVolumeSubmitted);
            let client = Arc::clone(self);
            self.submit_frame(&program, frame, payload, move |frame, reply| {
                client.on_setvolume_reply(attempt, frame, reply);
            });
            Ok(())
        })();

        if let Err(err) = submitted {
            tracing::error!(client = self.name(), error = %err, "failed to send SETVOLUME");
            self.apply(
                attempt,
                HandshakeEvent::SetVolumeReplied(SetVolumeOutcome::Failed(err)),
            );
        }
    }

    fn on_setvolume_reply(self: &Arc<Self>, attempt: u64, frame: CallFrame, reply: RpcReply) {
        let peer = self.conn.peer();
        let outcome = setvolume::interpret_reply(&self.config, &peer, reply);
        self.apply(attempt, HandshakeEvent::SetVolumeReplied(outcome));
        frame.destroy();
    }
}
