//! Reply buffers owned by the transport's receive path.
//!
//! A reply payload handed up by the transport belongs to the transport's
//! allocator, not ours. `ForeignBuf` carries the release strategy with the
//! bytes, so dropping it always goes back through the transport's
//! [`BufferRelease`] hook. Locally built buffers are plain `Bytes`/`Vec`.

use std::fmt;
use std::ops::{Deref, Range};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

/// Release path for buffers allocated outside this crate.
pub trait BufferRelease: Send + Sync {
    /// Called exactly once when the last view of a foreign buffer is dropped.
    fn release(&self, len: usize);
}

struct ForeignInner {
    data: Bytes,
    release: Arc<dyn BufferRelease>,
}

impl Drop for ForeignInner {
    fn drop(&mut self) {
        self.release.release(self.data.len());
    }
}

/// A view into a transport-owned receive buffer.
#[derive(Clone)]
pub struct ForeignBuf {
    inner: Arc<ForeignInner>,
    range: Range<usize>,
}

impl ForeignBuf {
    /// Wraps transport-owned bytes together with the hook that frees them.
    pub fn new(data: Bytes, release: Arc<dyn BufferRelease>) -> Self {
        let range = 0..data.len();
        Self {
            inner: Arc::new(ForeignInner { data, release }),
            range,
        }
    }

    /// Wraps bytes whose release needs no callback (tests, in-process replies).
    pub fn unmanaged(data: Bytes) -> Self {
        Self::new(data, Arc::new(NoRelease))
    }

    /// Returns a sub-view sharing the same release obligation.
    ///
    /// `range` is relative to this view and must lie within it.
    pub fn slice(&self, range: Range<usize>) -> Option<ForeignBuf> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        let start = self.range.start + range.start;
        Some(ForeignBuf {
            inner: Arc::clone(&self.inner),
            range: start..start + range.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Copies the view into a locally owned buffer.
    pub fn to_local(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }
}

impl AsRef<[u8]> for ForeignBuf {
    fn as_ref(&self) -> &[u8] {
        &self.inner.data[self.range.clone()]
    }
}

impl Deref for ForeignBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

impl fmt::Debug for ForeignBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignBuf")
            .field("len", &self.len())
            .field("range", &self.range)
            .finish()
    }
}

struct NoRelease;

impl BufferRelease for NoRelease {
    fn release(&self, _len: usize) {}
}

/// Counts releases; used by transports that want to audit their buffers.
#[derive(Debug, Default)]
pub struct CountingRelease {
    released: AtomicU64,
    bytes: AtomicU64,
}

impl CountingRelease {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    pub fn released_bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

impl BufferRelease for CountingRelease {
    fn release(&self, len: usize) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(len as u64, Ordering::SeqCst);
    }
}
