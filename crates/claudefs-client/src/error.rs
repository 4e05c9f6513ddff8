use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {reason}")]
    Transport { reason: String },

    #[error("decode error: {reason}")]
    Decode { reason: String },

    #[error("encode error: {reason}")]
    Encode { reason: String },

    #[error("server rejected request (errno {op_errno}): {message}")]
    ServerRejected { op_errno: i32, message: String },

    #[error("volume file is stale: {message}")]
    StaleConfig { message: String },

    #[error("server versions are not present in this release")]
    NegotiationFailed,

    #[error("resource exhausted: {what}")]
    ResourceExhausted { what: &'static str },

    #[error("handshake program not configured")]
    HandshakeDisabled,

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn decode(reason: impl Into<String>) -> Self {
        ClientError::Decode {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        ClientError::Transport {
            reason: reason.into(),
        }
    }

    /// Errno reported to callers that expect a failure-shaped reply.
    pub fn errno(&self) -> i32 {
        use libc::*;
        match self {
            ClientError::Transport { .. } => EINVAL,
            ClientError::Decode { .. } => EINVAL,
            ClientError::Encode { .. } => EINVAL,
            ClientError::ServerRejected { op_errno, .. } => *op_errno,
            ClientError::StaleConfig { .. } => ESTALE,
            ClientError::NegotiationFailed => EPROTONOSUPPORT,
            ClientError::ResourceExhausted { .. } => ENOMEM,
            ClientError::HandshakeDisabled => ESTALE,
            ClientError::InvalidConfig { .. } => EINVAL,
        }
    }
}

/// Renders an errno the way the C library would, for log messages that have
/// no remote error string to show.
pub fn strerror(errno: i32) -> String {
    std::io::Error::from_raw_os_error(errno).to_string()
}
