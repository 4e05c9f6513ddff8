//! Volume-spec fetch (GETSPEC).

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::buffer::ForeignBuf;
use crate::client::ProtocolClient;
use crate::error::{strerror, ClientError, Result};
use crate::message::{GetSpecReply, GetSpecRequest};
use crate::program::{HandshakeProc, ProcedureId};
use crate::transport::RpcReply;

impl ProtocolClient {
    /// Fetches the volume specification registered under `key`.
    ///
    /// The returned buffer is a view into the transport's reply and is
    /// released through the transport's allocator when dropped.
    pub async fn get_spec(self: &Arc<Self>, key: &str, flags: u32) -> Result<ForeignBuf> {
        let program = self
            .config
            .handshake_program()
            .cloned()
            .ok_or(ClientError::HandshakeDisabled)?;
        let payload = GetSpecRequest {
            flags,
            key: key.to_string(),
        }
        .encode()?;
        let frame = self
            .conn
            .frames()
            .create(ProcedureId::Handshake(HandshakeProc::GetSpec))
            .ok_or(ClientError::ResourceExhausted { what: "frame" })?;

        let (tx, rx) = oneshot::channel();
        let name = self.name().to_string();
        self.submit_frame(&program, frame, payload, move |frame, reply| {
            let result = spec_from_reply(&name, reply);
            frame.destroy();
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        });

        rx.await
            .map_err(|_| ClientError::transport("GETSPEC reply dropped"))?
    }
}

fn spec_from_reply(name: &str, reply: RpcReply) -> Result<ForeignBuf> {
    let buf = reply.map_err(|e| {
        tracing::warn!(client = name, error = %e, "GETSPEC request bailed");
        ClientError::transport(e.to_string())
    })?;
    let rsp = GetSpecReply::decode(&buf).map_err(|e| {
        tracing::error!(client = name, error = %e, "failed to decode GETSPEC reply");
        e
    })?;
    if rsp.op_ret == -1 {
        tracing::warn!(client = name, "failed to get the 'volume file' from server");
        return Err(ClientError::ServerRejected {
            op_errno: rsp.op_errno,
            message: strerror(rsp.op_errno),
        });
    }
    Ok(rsp.spec)
}
