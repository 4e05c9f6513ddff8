//! In-memory server and recording collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use claudefs_client::message::{DumpReply, GetSpecReply, SetVolumeReply};
use claudefs_client::program::{DumpProc, HandshakeProc, DUMP_PROGRAM, HANDSHAKE_PROGRAM};
use claudefs_client::{
    ClientError, ClientOptions, CountingRelease, FdContext, FdReopener, ForeignBuf,
    HandshakeConfig, OptionBag, ParentEvent, ParentNotify, ProgDetail, ProtocolClient, RpcProgram,
    RpcReply, RpcTransport,
};
use parking_lot::Mutex;

pub const PEER: &str = "10.0.0.7:24007";

/// Installs a test subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the server treats PING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMode {
    Answer,
    /// Never reply.
    Hang,
    /// The request bails.
    Fail,
}

/// How the server treats data-path calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FopMode {
    Answer,
    Hang,
}

/// Scripted server answering the handshake and dump programs.
pub struct FakeServer {
    pub programs: Mutex<Vec<ProgDetail>>,
    pub setvolume: Mutex<(i32, i32, OptionBag)>,
    pub dump_delay: Mutex<Option<Duration>>,
    pub ping_mode: Mutex<PingMode>,
    pub fop_mode: Mutex<FopMode>,
    pub fail_all: AtomicBool,
    pub fail_setvolume: AtomicBool,
    pub release: Arc<CountingRelease>,
    pub calls: Mutex<Vec<(u64, u32)>>,
    pub pings: AtomicUsize,
    pub replies: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeServer {
    /// Advertises `("data", 330, 1)` and accepts SETVOLUME from a remote process.
    pub fn new() -> Arc<Self> {
        let mut bag = OptionBag::new();
        bag.set_str("process-uuid", "remote-proc");
        Arc::new(Self {
            programs: Mutex::new(vec![
                ProgDetail::new("GF-DUMP", DUMP_PROGRAM, 1),
                ProgDetail::new("data", 330, 1),
            ]),
            setvolume: Mutex::new((0, 0, bag)),
            dump_delay: Mutex::new(None),
            ping_mode: Mutex::new(PingMode::Answer),
            fop_mode: Mutex::new(FopMode::Answer),
            fail_all: AtomicBool::new(false),
            fail_setvolume: AtomicBool::new(false),
            release: CountingRelease::new(),
            calls: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            replies: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn reject_setvolume(&self, op_errno: i32, error: Option<&str>) {
        let mut bag = OptionBag::new();
        if let Some(msg) = error {
            bag.set_str("ERROR", msg);
        }
        *self.setvolume.lock() = (-1, op_errno, bag);
    }

    pub fn count_calls(&self, prognum: u64, procnum: u32) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(p, n)| *p == prognum && *n == procnum)
            .count()
    }

    pub fn setvolume_calls(&self) -> usize {
        self.count_calls(HANDSHAKE_PROGRAM, HandshakeProc::SetVolume.number())
    }

    fn reply(&self, bytes: Bytes) -> RpcReply {
        self.replies.fetch_add(1, Ordering::SeqCst);
        Ok(ForeignBuf::new(bytes, self.release.clone()))
    }
}

#[async_trait]
impl RpcTransport for FakeServer {
    async fn call(&self, program: &RpcProgram, procnum: u32, _payload: Bytes) -> RpcReply {
        self.calls.lock().push((program.prognum, procnum));
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ClientError::transport("request bailed"));
        }

        if program.prognum == DUMP_PROGRAM && procnum == DumpProc::Dump.number() {
            let delay = *self.dump_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let programs = self.programs.lock().clone();
            let bytes = DumpReply {
                gfs_id: 0xbabe,
                op_ret: 0,
                op_errno: 0,
                programs,
            }
            .encode()?;
            return self.reply(bytes);
        }

        if program.prognum == HANDSHAKE_PROGRAM {
            if procnum == HandshakeProc::SetVolume.number() {
                if self.fail_setvolume.load(Ordering::SeqCst) {
                    return Err(ClientError::transport("setvolume bailed"));
                }
                let (op_ret, op_errno, bag) = {
                    let sv = self.setvolume.lock();
                    (sv.0, sv.1, sv.2.serialize()?)
                };
                return self.reply(SetVolumeReply::encode(op_ret, op_errno, &bag)?);
            }
            if procnum == HandshakeProc::GetSpec.number() {
                return self.reply(GetSpecReply::encode(0, 0, b"volume testvol\nend-volume\n")?);
            }
            if procnum == HandshakeProc::Ping.number() {
                self.pings.fetch_add(1, Ordering::SeqCst);
                let mode = *self.ping_mode.lock();
                return match mode {
                    PingMode::Answer => self.reply(Bytes::new()),
                    PingMode::Hang => std::future::pending().await,
                    PingMode::Fail => Err(ClientError::transport("ping bailed")),
                };
            }
        }

        let mode = *self.fop_mode.lock();
        match mode {
            FopMode::Answer => self.reply(Bytes::new()),
            FopMode::Hang => std::future::pending().await,
        }
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn peer_identifier(&self) -> String {
        PEER.to_string()
    }
}

/// Parent that records every event it receives.
#[derive(Default)]
pub struct EventLog {
    pub events: Mutex<Vec<ParentEvent>>,
}

impl EventLog {
    pub fn count(&self, event: ParentEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }
}

impl ParentNotify for EventLog {
    fn notify(&self, event: ParentEvent, _child: &str) {
        self.events.lock().push(event);
    }
}

/// Reopener that records which fds it was asked to reopen.
#[derive(Default)]
pub struct RecordingReopener {
    pub files: Mutex<Vec<u64>>,
    pub dirs: Mutex<Vec<u64>>,
}

impl RecordingReopener {
    pub fn total(&self) -> usize {
        self.files.lock().len() + self.dirs.lock().len()
    }
}

impl FdReopener for RecordingReopener {
    fn reopen(&self, fd: &FdContext) {
        self.files.lock().push(fd.local_id);
    }

    fn reopendir(&self, fd: &FdContext) {
        self.dirs.lock().push(fd.local_id);
    }
}

pub fn options(ping_timeout_secs: u32) -> ClientOptions {
    let mut opts = ClientOptions::new("testvol-client-0", "server1", "/bricks/b0");
    opts.ping_timeout_secs = ping_timeout_secs;
    opts
}

pub fn config(ping_timeout_secs: u32) -> HandshakeConfig {
    HandshakeConfig::new(options(ping_timeout_secs))
        .unwrap()
        .with_process_uuid("local-proc")
        .with_fops(vec![RpcProgram::new("data", 330, 1)])
}

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub client: Arc<ProtocolClient>,
    pub parents: Vec<Arc<EventLog>>,
    pub reopener: Arc<RecordingReopener>,
}

/// Client with `n_parents` recording parents, not yet handshaken.
pub fn harness(ping_timeout_secs: u32, n_parents: usize) -> Harness {
    init_tracing();
    let server = FakeServer::new();
    let reopener = Arc::new(RecordingReopener::default());
    let client = ProtocolClient::new(config(ping_timeout_secs), server.clone(), reopener.clone())
        .unwrap();
    let parents: Vec<_> = (0..n_parents)
        .map(|_| {
            let log = Arc::new(EventLog::default());
            client.register_parent(log.clone());
            log
        })
        .collect();
    Harness {
        server,
        client,
        parents,
        reopener,
    }
}

/// Lets spawned reply tasks run to completion.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}
