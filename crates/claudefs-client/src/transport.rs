//! The RPC transport this client drives.
//!
//! Framing, the byte-level wire and call dispatch live behind this trait.
//! The handshake only needs to submit a call, learn its fate, ask for a
//! disconnect and name the peer in log messages.

use async_trait::async_trait;
use bytes::Bytes;

use crate::buffer::ForeignBuf;
use crate::error::Result;
use crate::program::RpcProgram;

/// Outcome of a submitted call. `Err` is a transport-level failure: the
/// request bailed without a reply.
pub type RpcReply = Result<ForeignBuf>;

/// A connected RPC transport.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Submits one call and resolves with the raw reply payload.
    ///
    /// # Arguments
    /// * `program` - Program the procedure belongs to.
    /// * `procnum` - Procedure number within `program`.
    /// * `payload` - XDR-encoded arguments.
    async fn call(&self, program: &RpcProgram, procnum: u32, payload: Bytes) -> RpcReply;

    /// Requests that the transport drop the connection. Idempotent.
    fn disconnect(&self);

    /// Human-readable peer identifier, e.g. `"10.0.0.7:24007"`.
    fn peer_identifier(&self) -> String;
}
