//! RPC program descriptors and procedure tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handshake program number.
pub const HANDSHAKE_PROGRAM: u64 = 14398633;
/// Handshake program version.
pub const HANDSHAKE_VERSION: u64 = 1;
/// Dump (capability probe) program number.
pub const DUMP_PROGRAM: u64 = 123451501;
/// Dump program version.
pub const DUMP_VERSION: u64 = 1;
/// Data-path (fops) program number compiled into this client.
pub const FOP_PROGRAM: u64 = 1298437;
/// Data-path (fops) program version compiled into this client.
pub const FOP_VERSION: u64 = 310;
/// Fixed tag sent in every DUMP request.
pub const DUMP_PROTOCOL_TAG: u64 = 0xbabe;

/// Identifies an RPC program by number and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcProgram {
    pub name: String,
    pub prognum: u64,
    pub progver: u64,
}

impl RpcProgram {
    pub fn new(name: impl Into<String>, prognum: u64, progver: u64) -> Self {
        Self {
            name: name.into(),
            prognum,
            progver,
        }
    }

    pub fn handshake() -> Self {
        Self::new("GlusterFS Handshake", HANDSHAKE_PROGRAM, HANDSHAKE_VERSION)
    }

    pub fn dump() -> Self {
        Self::new("GF-DUMP", DUMP_PROGRAM, DUMP_VERSION)
    }

    pub fn fops() -> Self {
        Self::new("GlusterFS 3.1", FOP_PROGRAM, FOP_VERSION)
    }

    pub fn matches(&self, detail: &ProgDetail) -> bool {
        self.prognum == detail.prognum && self.progver == detail.progver
    }
}

impl fmt::Display for RpcProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.name, self.prognum, self.progver)
    }
}

/// Procedures of the handshake program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HandshakeProc {
    Null = 0,
    SetVolume = 1,
    GetSpec = 2,
    Ping = 3,
}

impl HandshakeProc {
    pub fn name(self) -> &'static str {
        match self {
            HandshakeProc::Null => "NULL",
            HandshakeProc::SetVolume => "SETVOLUME",
            HandshakeProc::GetSpec => "GETSPEC",
            HandshakeProc::Ping => "PING",
        }
    }

    pub fn number(self) -> u32 {
        self as u32
    }
}

/// Procedures of the dump program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DumpProc {
    Null = 0,
    Dump = 1,
}

impl DumpProc {
    pub fn name(self) -> &'static str {
        match self {
            DumpProc::Null => "NULL",
            DumpProc::Dump => "DUMP",
        }
    }

    pub fn number(self) -> u32 {
        self as u32
    }
}

/// A procedure of any program this crate submits, or an opaque data-path
/// procedure number submitted on behalf of the layers above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureId {
    Handshake(HandshakeProc),
    Dump(DumpProc),
    Fop(u32),
}

impl ProcedureId {
    pub fn number(self) -> u32 {
        match self {
            ProcedureId::Handshake(p) => p.number(),
            ProcedureId::Dump(p) => p.number(),
            ProcedureId::Fop(n) => n,
        }
    }

    pub fn is_ping(self) -> bool {
        self == ProcedureId::Handshake(HandshakeProc::Ping)
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureId::Handshake(p) => f.write_str(p.name()),
            ProcedureId::Dump(p) => f.write_str(p.name()),
            ProcedureId::Fop(n) => write!(f, "FOP({})", n),
        }
    }
}

/// One program advertised by the server in a DUMP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgDetail {
    pub name: String,
    pub prognum: u64,
    pub progver: u64,
}

impl ProgDetail {
    pub fn new(name: impl Into<String>, prognum: u64, progver: u64) -> Self {
        Self {
            name: name.into(),
            prognum,
            progver,
        }
    }
}
