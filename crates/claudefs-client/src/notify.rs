//! Events delivered to the components layered above this client.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// One-way notification to a dependent component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentEvent {
    /// The connection is fully usable.
    ChildUp,
    /// A handshake is in progress or being retried; not yet usable.
    ChildConnecting,
    /// The server rejected our volume definition as outdated; refetch it.
    VolfileModified,
}

impl fmt::Display for ParentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentEvent::ChildUp => write!(f, "CHILD_UP"),
            ParentEvent::ChildConnecting => write!(f, "CHILD_CONNECTING"),
            ParentEvent::VolfileModified => write!(f, "VOLFILE_MODIFIED"),
        }
    }
}

/// A dependent component that wants connection events.
pub trait ParentNotify: Send + Sync {
    /// `child` is the name of the notifying client component.
    fn notify(&self, event: ParentEvent, child: &str);
}

/// Dependents in registration order.
#[derive(Default)]
pub struct Parents {
    list: RwLock<Vec<Arc<dyn ParentNotify>>>,
}

impl Parents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, parent: Arc<dyn ParentNotify>) {
        self.list.write().push(parent);
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Delivers `event` to every parent, in registration order.
    pub fn notify_all(&self, event: ParentEvent, child: &str) {
        // Snapshot so a parent may register another parent from its callback.
        let parents: Vec<_> = self.list.read().iter().cloned().collect();
        tracing::debug!(event = %event, child, parents = parents.len(), "notifying parents");
        for parent in parents {
            parent.notify(event, child);
        }
    }
}

impl fmt::Debug for Parents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parents").field("count", &self.len()).finish()
    }
}
