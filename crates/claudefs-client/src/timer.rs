//! One-shot timers on the tokio runtime.
//!
//! A timer fires at most once per arming. Cancelling a timer that already
//! fired, or was already cancelled, is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const STATE_ARMED: u8 = 0;
const STATE_FIRED: u8 = 1;
const STATE_CANCELLED: u8 = 2;

/// Schedules callbacks after a delay.
pub struct TimerService {
    runtime: Handle,
    next_id: AtomicU64,
    live: Arc<AtomicUsize>,
    armed_total: AtomicU64,
    shut_down: AtomicBool,
}

impl TimerService {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            live: Arc::new(AtomicUsize::new(0)),
            armed_total: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Binds to the runtime of the calling context, if there is one.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Arms a timer that runs `callback` on a runtime worker after `delay`.
    ///
    /// Returns `None` if the service no longer accepts timers.
    pub fn call_after<F>(&self, delay: Duration, callback: F) -> Option<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(STATE_ARMED));
        self.live.fetch_add(1, Ordering::SeqCst);
        self.armed_total.fetch_add(1, Ordering::Relaxed);

        let task_state = Arc::clone(&state);
        let task_live = Arc::clone(&self.live);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if task_state
                .compare_exchange(STATE_ARMED, STATE_FIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                task_live.fetch_sub(1, Ordering::SeqCst);
                callback();
            }
        });

        Some(TimerHandle {
            id,
            delay,
            state,
            live: Arc::clone(&self.live),
            task,
        })
    }

    /// Timers armed and neither fired nor cancelled.
    pub fn live_timers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Total timers ever armed.
    pub fn armed_total(&self) -> u64 {
        self.armed_total.load(Ordering::Relaxed)
    }

    /// Refuses further timers. Already armed timers are unaffected.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("live", &self.live_timers())
            .field("armed_total", &self.armed_total())
            .finish()
    }
}

/// Handle to one armed timer.
pub struct TimerHandle {
    id: u64,
    delay: Duration,
    state: Arc<AtomicU8>,
    live: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancels the timer. Returns `true` only if this call prevented it
    /// from firing.
    pub fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(
                STATE_ARMED,
                STATE_CANCELLED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.task.abort();
            true
        } else {
            false
        }
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_FIRED
    }

    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_ARMED
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("delay", &self.delay)
            .field("armed", &self.is_armed())
            .finish()
    }
}
