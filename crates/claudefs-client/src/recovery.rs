//! Post-handshake fd recovery.
//!
//! A disconnect invalidates the remote half of every open file. After the
//! next successful handshake, every saved fd without a remote handle is
//! reopened and the parents are told the child is up.

use crate::config::HandshakeConfig;
use crate::notify::{ParentEvent, Parents};

/// Client-side record of one remote open file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdContext {
    /// Local identity of the open file; stable across reconnects.
    pub local_id: u64,
    /// Remote handle, `None` until (re)opened on the current connection.
    pub remote_fd: Option<i64>,
    pub is_dir: bool,
    /// Path the fd was opened on, used to reopen it.
    pub path: String,
    /// Open flags for file reopens. Ignored for directories.
    pub flags: i32,
}

impl FdContext {
    pub fn file(local_id: u64, path: impl Into<String>, flags: i32) -> Self {
        Self {
            local_id,
            remote_fd: None,
            is_dir: false,
            path: path.into(),
            flags,
        }
    }

    pub fn dir(local_id: u64, path: impl Into<String>) -> Self {
        Self {
            local_id,
            remote_fd: None,
            is_dir: true,
            path: path.into(),
            flags: 0,
        }
    }

    pub fn with_remote(mut self, remote_fd: i64) -> Self {
        self.remote_fd = Some(remote_fd);
        self
    }

    pub fn needs_reopen(&self) -> bool {
        self.remote_fd.is_none()
    }
}

/// The saved-fd list, in open order.
#[derive(Debug, Default)]
pub struct SavedFds {
    entries: Vec<FdContext>,
}

impl SavedFds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an fd. Replaces an existing entry with the same local id.
    pub fn insert(&mut self, fd: FdContext) {
        match self.entries.iter_mut().find(|e| e.local_id == fd.local_id) {
            Some(existing) => *existing = fd,
            None => self.entries.push(fd),
        }
    }

    /// Removes the fd on local close.
    pub fn remove(&mut self, local_id: u64) -> Option<FdContext> {
        let pos = self.entries.iter().position(|e| e.local_id == local_id)?;
        Some(self.entries.remove(pos))
    }

    pub fn get(&self, local_id: u64) -> Option<&FdContext> {
        self.entries.iter().find(|e| e.local_id == local_id)
    }

    /// Records the remote handle once a (re)open completes. Returns false if
    /// the fd was closed meanwhile.
    pub fn set_remote_fd(&mut self, local_id: u64, remote_fd: i64) -> bool {
        match self.entries.iter_mut().find(|e| e.local_id == local_id) {
            Some(e) => {
                e.remote_fd = Some(remote_fd);
                true
            }
            None => false,
        }
    }

    /// Clears every remote handle. Called when the transport drops.
    pub fn invalidate_all(&mut self) {
        for e in &mut self.entries {
            e.remote_fd = None;
        }
    }

    /// Copies every entry whose remote handle is unset, in open order. The
    /// entries stay in the list so completions and closes still find them.
    pub fn unopened(&self) -> Vec<FdContext> {
        self.entries
            .iter()
            .filter(|e| e.needs_reopen())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FdContext> {
        self.entries.iter()
    }
}

/// Issues reopen requests. Both calls are fire-and-forget; completion is
/// reported back through [`HandshakeConfig::set_remote_fd`].
pub trait FdReopener: Send + Sync {
    fn reopen(&self, fd: &FdContext);
    fn reopendir(&self, fd: &FdContext);
}

/// Reopener for clients that never keep fds open across reconnects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReopen;

impl FdReopener for NoReopen {
    fn reopen(&self, fd: &FdContext) {
        tracing::debug!(local_id = fd.local_id, "no reopener configured, fd stays unopened");
    }

    fn reopendir(&self, fd: &FdContext) {
        tracing::debug!(local_id = fd.local_id, "no reopener configured, dir stays unopened");
    }
}

/// Runs recovery after a successful SETVOLUME: reopens every saved fd that
/// lost its remote handle, then sends CHILD_UP to each parent in order.
///
/// The config lock is held only to copy the unopened entries; reopen
/// requests are issued without it. Returns the number of reopens issued.
pub fn post_handshake(
    config: &HandshakeConfig,
    reopener: &dyn FdReopener,
    parents: &Parents,
    child: &str,
) -> usize {
    let working = config.lock().saved_fds.unopened();
    let count = working.len();

    for fd in &working {
        if fd.is_dir {
            reopener.reopendir(fd);
        } else {
            reopener.reopen(fd);
        }
    }

    if count > 0 {
        tracing::info!(count, child, "reopen requests issued for saved fds");
    }

    parents.notify_all(ParentEvent::ChildUp, child);
    count
}
