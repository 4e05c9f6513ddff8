#![warn(missing_docs)]

//! ClaudeFS client protocol subsystem: connection handshake, program negotiation, ping keepalive, fd recovery

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod dict;
pub mod error;
pub mod frame;
pub mod getspec;
pub mod handshake;
pub mod keepalive;
pub mod message;
pub mod negotiate;
pub mod notify;
pub mod program;
pub mod recovery;
pub mod setvolume;
pub mod stats;
pub mod timer;
pub mod transport;
pub mod xdr;

pub use buffer::{BufferRelease, CountingRelease, ForeignBuf};
pub use client::ProtocolClient;
pub use config::{ClientOptions, HandshakeConfig, DEFAULT_PING_TIMEOUT_SECS};
pub use connection::ConnSnapshot;
pub use dict::OptionBag;
pub use error::{ClientError, Result};
pub use frame::{CallFrame, FramePool, FrameStats};
pub use handshake::{HandshakeAction, HandshakeEvent, HandshakePhase};
pub use negotiate::{NegotiatedPrograms, ProgramNegotiator};
pub use notify::{ParentEvent, ParentNotify};
pub use program::{ProgDetail, RpcProgram};
pub use recovery::{FdContext, FdReopener, NoReopen};
pub use setvolume::SetVolumeOutcome;
pub use stats::ClientStatsSnapshot;
pub use transport::{RpcReply, RpcTransport};
