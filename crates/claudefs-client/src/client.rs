//! The protocol client: one per remote brick.
//!
//! Ties the connection, the per-client config record, the parent registry
//! and the fd reopener together. The handshake, keepalive and GETSPEC
//! entry points are implemented in their own modules on this type.

use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::config::HandshakeConfig;
use crate::connection::{ConnSnapshot, RpcConnection};
use crate::error::{ClientError, Result};
use crate::frame::{CallFrame, FramePool, FrameStats};
use crate::handshake::HandshakePhase;
use crate::negotiate::NegotiatedPrograms;
use crate::notify::{ParentNotify, Parents};
use crate::program::{ProcedureId, RpcProgram};
use crate::recovery::{FdReopener, NoReopen};
use crate::stats::{ClientStats, ClientStatsSnapshot};
use crate::transport::{RpcReply, RpcTransport};

/// Client side of one transport connection.
pub struct ProtocolClient {
    pub(crate) config: HandshakeConfig,
    pub(crate) conn: RpcConnection,
    pub(crate) parents: Parents,
    pub(crate) reopener: Arc<dyn FdReopener>,
    pub(crate) stats: ClientStats,
}

impl ProtocolClient {
    /// Creates a client bound to the current tokio runtime.
    ///
    /// # Arguments
    /// * `config` - Per-client configuration record.
    /// * `transport` - The transport calls are submitted on.
    /// * `reopener` - Issues reopen requests during fd recovery.
    pub fn new(
        config: HandshakeConfig,
        transport: Arc<dyn RpcTransport>,
        reopener: Arc<dyn FdReopener>,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| ClientError::InvalidConfig {
            reason: "protocol client requires a tokio runtime".to_string(),
        })?;
        Ok(Self::with_runtime(config, transport, reopener, runtime))
    }

    /// Creates a client that spawns reply and timer tasks on `runtime`.
    pub fn with_runtime(
        config: HandshakeConfig,
        transport: Arc<dyn RpcTransport>,
        reopener: Arc<dyn FdReopener>,
        runtime: Handle,
    ) -> Arc<Self> {
        let frames = FramePool::new(config.options().frame_limit);
        tracing::debug!(
            client = config.name(),
            peer = %transport.peer_identifier(),
            ping_timeout_secs = config.ping_timeout().as_secs(),
            "protocol client created"
        );
        Arc::new(Self {
            conn: RpcConnection::new(transport, frames, runtime),
            config,
            parents: Parents::new(),
            reopener,
            stats: ClientStats::new(),
        })
    }

    /// Client that keeps no fds across reconnects.
    pub fn without_reopen(config: HandshakeConfig, transport: Arc<dyn RpcTransport>) -> Result<Arc<Self>> {
        Self::new(config, transport, Arc::new(NoReopen))
    }

    /// Stops keepalive for good: cancels the ping timer and refuses new
    /// ones. Calls already in flight still complete.
    pub fn shutdown(&self) {
        self.conn.timers().shutdown();
        self.conn.lock().disarm_ping();
        tracing::debug!(client = self.name(), "keepalive shut down");
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn register_parent(&self, parent: Arc<dyn ParentNotify>) {
        self.parents.register(parent);
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().connected
    }

    pub fn is_connecting(&self) -> bool {
        self.conn.lock().connecting
    }

    pub fn phase(&self) -> HandshakePhase {
        self.conn.lock().phase
    }

    pub fn connection(&self) -> ConnSnapshot {
        self.conn.lock().snapshot()
    }

    pub fn negotiated(&self) -> NegotiatedPrograms {
        self.config.negotiated()
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.conn.frames().stats()
    }

    /// Timers currently armed for this connection.
    pub fn live_timers(&self) -> usize {
        self.conn.timers().live_timers()
    }

    /// Submits a data-path call on behalf of the layers above.
    ///
    /// `on_reply` runs exactly once, on a runtime worker. Starts keepalive
    /// if the connection is up and it is not running yet.
    pub fn submit_request<F>(
        self: &Arc<Self>,
        program: &RpcProgram,
        procnum: u32,
        payload: Bytes,
        on_reply: F,
    ) -> Result<()>
    where
        F: FnOnce(RpcReply) + Send + 'static,
    {
        let frame = self
            .conn
            .frames()
            .create(ProcedureId::Fop(procnum))
            .ok_or(ClientError::ResourceExhausted { what: "frame" })?;
        self.submit_frame(program, frame, payload, move |frame, reply| {
            on_reply(reply);
            frame.destroy();
        });
        Ok(())
    }

    pub(crate) fn submit_frame<F>(
        self: &Arc<Self>,
        program: &RpcProgram,
        frame: CallFrame,
        payload: Bytes,
        on_reply: F,
    ) where
        F: FnOnce(CallFrame, RpcReply) + Send + 'static,
    {
        if self.conn.submit(program, frame, payload, on_reply) {
            self.start_ping();
        }
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("name", &self.name())
            .field("conn", &self.conn)
            .field("parents", &self.parents)
            .finish()
    }
}
