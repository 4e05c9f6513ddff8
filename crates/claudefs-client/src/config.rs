//! Client configuration.
//!
//! [`ClientOptions`] is the serializable part loaded by the enclosing
//! client. [`HandshakeConfig`] is the per-client record built from it: it
//! outlives every connection and owns the saved-fd list.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::dict::OptionBag;
use crate::error::{ClientError, Result};
use crate::negotiate::{NegotiatedPrograms, ProgramNegotiator};
use crate::program::RpcProgram;
use crate::recovery::{FdContext, SavedFds};

/// Default keepalive interval in seconds.
pub const DEFAULT_PING_TIMEOUT_SECS: u32 = 42;

/// Options for one protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Name of this client component, e.g. `"testvol-client-0"`.
    pub name: String,
    /// Server host, sent to the server for logging.
    pub remote_host: String,
    /// Brick path on the server to attach to.
    pub remote_subvolume: String,
    /// Keepalive interval. 0 disables keepalive.
    pub ping_timeout_secs: u32,
    /// Authentication parameters, sent verbatim in SETVOLUME.
    pub auth: BTreeMap<String, String>,
    /// Server the volume file was fetched from, if any.
    pub volfile_server: Option<String>,
    pub volfile_key: Option<String>,
    pub volfile_checksum: u32,
    /// In-flight frame limit. 0 is unbounded.
    pub frame_limit: usize,
    /// When false the handshake program is not configured and
    /// `handshake()` is a no-op.
    pub handshake: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            remote_host: String::new(),
            remote_subvolume: String::new(),
            ping_timeout_secs: DEFAULT_PING_TIMEOUT_SECS,
            auth: BTreeMap::new(),
            volfile_server: None,
            volfile_key: None,
            volfile_checksum: 0,
            frame_limit: 0,
            handshake: true,
        }
    }
}

impl ClientOptions {
    pub fn new(name: &str, remote_host: &str, remote_subvolume: &str) -> Self {
        Self {
            name: name.to_string(),
            remote_host: remote_host.to_string(),
            remote_subvolume: remote_subvolume.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ClientError::InvalidConfig {
                reason: "client name cannot be empty".to_string(),
            });
        }

        if self.remote_subvolume.is_empty() {
            return Err(ClientError::InvalidConfig {
                reason: "remote-subvolume must be set".to_string(),
            });
        }

        for key in self.auth.keys() {
            if key.is_empty() {
                return Err(ClientError::InvalidConfig {
                    reason: "auth parameter with empty key".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.ping_timeout_secs))
    }

    /// Options sent to the server in every SETVOLUME request.
    pub fn to_option_bag(&self) -> OptionBag {
        let mut bag = OptionBag::new();
        bag.set_str("remote-subvolume", self.remote_subvolume.as_str());
        if !self.remote_host.is_empty() {
            bag.set_str("remote-host", self.remote_host.as_str());
        }
        for (key, value) in &self.auth {
            bag.set_str(key, value.as_str());
        }
        if self.volfile_server.is_some() {
            if let Some(key) = &self.volfile_key {
                bag.set_str("volfile-key", key.as_str());
            }
            bag.set_u32("volfile-checksum", self.volfile_checksum);
        }
        bag
    }
}

/// Mutable config state, guarded by the config lock.
#[derive(Debug, Default)]
pub struct ConfigState {
    pub negotiated: NegotiatedPrograms,
    pub saved_fds: SavedFds,
}

/// Per-client configuration record. One per client; survives reconnects.
#[derive(Debug)]
pub struct HandshakeConfig {
    options: ClientOptions,
    ping_timeout: Duration,
    process_uuid: String,
    fops: Vec<RpcProgram>,
    mgmt: Vec<RpcProgram>,
    handshake_prog: Option<RpcProgram>,
    dump_prog: Option<RpcProgram>,
    state: Mutex<ConfigState>,
}

impl HandshakeConfig {
    /// Builds the record with the default fops descriptor and a fresh
    /// process identity.
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let (handshake_prog, dump_prog) = if options.handshake {
            (Some(RpcProgram::handshake()), Some(RpcProgram::dump()))
        } else {
            (None, None)
        };
        Ok(Self {
            ping_timeout: options.ping_timeout(),
            options,
            process_uuid: uuid::Uuid::new_v4().to_string(),
            fops: vec![RpcProgram::fops()],
            mgmt: Vec::new(),
            handshake_prog,
            dump_prog,
            state: Mutex::new(ConfigState::default()),
        })
    }

    pub fn with_process_uuid(mut self, process_uuid: impl Into<String>) -> Self {
        self.process_uuid = process_uuid.into();
        self
    }

    /// Replaces the data-path descriptors, most preferred first.
    pub fn with_fops(mut self, fops: Vec<RpcProgram>) -> Self {
        self.fops = fops;
        self
    }

    pub fn with_mgmt(mut self, mgmt: RpcProgram) -> Self {
        self.mgmt.push(mgmt);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    pub fn process_uuid(&self) -> &str {
        &self.process_uuid
    }

    /// Identity sent in SETVOLUME: `<process-uuid>-<component-name>`.
    pub fn composite_process_uuid(&self) -> String {
        format!("{}-{}", self.process_uuid, self.options.name)
    }

    pub fn handshake_program(&self) -> Option<&RpcProgram> {
        self.handshake_prog.as_ref()
    }

    pub fn dump_program(&self) -> Option<&RpcProgram> {
        self.dump_prog.as_ref()
    }

    pub fn negotiator(&self) -> ProgramNegotiator {
        ProgramNegotiator::new(self.fops.clone(), self.mgmt.clone())
    }

    /// Takes the config lock. Never hold it across network I/O.
    pub fn lock(&self) -> MutexGuard<'_, ConfigState> {
        self.state.lock()
    }

    pub fn negotiated(&self) -> NegotiatedPrograms {
        self.state.lock().negotiated.clone()
    }

    pub fn set_negotiated(&self, negotiated: NegotiatedPrograms) {
        self.state.lock().negotiated = negotiated;
    }

    /// Records an fd opened over the current connection.
    pub fn save_fd(&self, fd: FdContext) {
        self.state.lock().saved_fds.insert(fd);
    }

    /// Forgets an fd on local close.
    pub fn release_fd(&self, local_id: u64) -> Option<FdContext> {
        self.state.lock().saved_fds.remove(local_id)
    }

    /// Completion hook for reopen requests.
    pub fn set_remote_fd(&self, local_id: u64, remote_fd: i64) -> bool {
        self.state.lock().saved_fds.set_remote_fd(local_id, remote_fd)
    }
}
