//! SETVOLUME request construction and reply interpretation.

use crate::config::HandshakeConfig;
use crate::dict::OptionBag;
use crate::error::{strerror, ClientError, Result};
use crate::message::{SetVolumeReply, SetVolumeRequest};
use crate::negotiate::NegotiatedPrograms;
use crate::transport::RpcReply;

/// What a SETVOLUME reply means for the connection.
#[derive(Debug)]
pub enum SetVolumeOutcome {
    /// The server attached us to the remote volume.
    Accepted {
        /// The reply came from this very process.
        loopback: bool,
    },
    /// The server considers our volume file outdated.
    Stale { message: String },
    /// Any other server-side rejection.
    Rejected { op_errno: i32, message: String },
    /// No usable reply: the request bailed or the reply did not decode.
    Failed(ClientError),
}

impl SetVolumeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SetVolumeOutcome::Accepted { .. })
    }

    /// The error reported for a failed attempt.
    pub fn into_error(self) -> Option<ClientError> {
        match self {
            SetVolumeOutcome::Accepted { .. } => None,
            SetVolumeOutcome::Stale { message } => Some(ClientError::StaleConfig { message }),
            SetVolumeOutcome::Rejected { op_errno, message } => {
                Some(ClientError::ServerRejected { op_errno, message })
            }
            SetVolumeOutcome::Failed(err) => Some(err),
        }
    }
}

/// Builds the option bag sent in SETVOLUME.
pub fn build_options(config: &HandshakeConfig, negotiated: &NegotiatedPrograms) -> OptionBag {
    let mut bag = config.options().to_option_bag();
    if let Some(fops) = &negotiated.fops {
        bag.set_u64("fops-version", fops.prognum);
    }
    if let Some(mgmt) = &negotiated.mgmt {
        bag.set_u64("mgmt-version", mgmt.prognum);
    }
    bag.set_str("process-uuid", config.composite_process_uuid());
    bag
}

pub fn build_request(config: &HandshakeConfig, negotiated: &NegotiatedPrograms) -> Result<SetVolumeRequest> {
    let bag = build_options(config, negotiated);
    let dict = bag.serialize().map_err(|e| {
        tracing::error!(error = %e, "failed to serialize dictionary");
        e
    })?;
    Ok(SetVolumeRequest { dict })
}

/// Interprets the reply to a SETVOLUME call.
pub fn interpret_reply(config: &HandshakeConfig, peer: &str, reply: RpcReply) -> SetVolumeOutcome {
    let name = config.name();

    let buf = match reply {
        Ok(buf) => buf,
        Err(e) => {
            tracing::debug!(client = name, error = %e, "SETVOLUME request bailed");
            return SetVolumeOutcome::Failed(ClientError::transport(e.to_string()));
        }
    };

    let rsp = match SetVolumeReply::decode(&buf) {
        Ok(rsp) => rsp,
        Err(e) => {
            tracing::error!(client = name, error = %e, "failed to decode SETVOLUME reply");
            return SetVolumeOutcome::Failed(e);
        }
    };

    if rsp.op_ret == -1 {
        tracing::warn!(client = name, "failed to set the volume");
    }

    let reply_bag = if rsp.dict.is_empty() {
        OptionBag::new()
    } else {
        match OptionBag::unserialize(&rsp.dict) {
            Ok(bag) => bag,
            Err(e) => {
                tracing::debug!(client = name, error = %e, "failed to unserialize buffer to dict");
                return SetVolumeOutcome::Failed(e);
            }
        }
    };

    let remote_error = reply_bag.get_str("ERROR");
    if remote_error.is_none() {
        tracing::debug!(client = name, "failed to get ERROR string from reply dict");
    }
    let process_uuid = reply_bag.get_str("process-uuid");
    if process_uuid.is_none() {
        tracing::debug!(client = name, "failed to get 'process-uuid' from reply dict");
    }

    if rsp.op_ret < 0 {
        let message = remote_error
            .map(str::to_string)
            .unwrap_or_else(|| strerror(rsp.op_errno));
        tracing::error!(client = name, "SETVOLUME on remote-host failed: {}", message);
        if rsp.op_errno == libc::ESTALE {
            return SetVolumeOutcome::Stale { message };
        }
        return SetVolumeOutcome::Rejected {
            op_errno: rsp.op_errno,
            message,
        };
    }

    let remote_subvol = &config.options().remote_subvolume;
    let loopback = process_uuid == Some(config.process_uuid());
    if loopback {
        // Transport rewiring to the in-process server is not implemented.
        tracing::warn!(client = name, "attaching to the local volume '{}'", remote_subvol);
    }

    tracing::info!(
        client = name,
        "Connected to {}, attached to remote volume '{}'.",
        peer,
        remote_subvol
    );
    SetVolumeOutcome::Accepted { loopback }
}
