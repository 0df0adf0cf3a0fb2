//! The virtual clock and its timer queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::Waker;
use std::time::Duration;

use parking_lot::Mutex;

use crate::executor::Scope;

/// Identifies a registered timer. Orders by deadline, then by registration.
pub(crate) type TimerKey = (Duration, u64);

#[derive(Debug)]
struct TimerEntry {
    waker: Option<Waker>,
    scope: Scope,
}

/// Pending timers, earliest deadline first; equal deadlines in registration order.
#[derive(Debug, Default)]
struct TimerQueue {
    pending: BTreeMap<TimerKey, TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    fn register(&mut self, deadline: Duration, scope: Scope, waker: &Waker) -> TimerKey {
        let key = (deadline, self.next_seq);
        self.next_seq += 1;
        self.pending.insert(
            key,
            TimerEntry {
                waker: Some(waker.clone()),
                scope,
            },
        );
        key
    }

    fn update_waker(&mut self, key: TimerKey, waker: &Waker) {
        if let Some(entry) = self.pending.get_mut(&key) {
            match &entry.waker {
                Some(existing) if existing.will_wake(waker) => {}
                _ => entry.waker = Some(waker.clone()),
            }
        }
    }

    /// Removes every timer due at `now`, in firing order.
    fn take_due(&mut self, now: Duration) -> Vec<Waker> {
        let mut wakers = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 > now {
                break;
            }
            if let Some(waker) = entry.remove().waker {
                wakers.push(waker);
            }
        }
        wakers
    }
}

/// Virtual time shared by a scheduler and every timer created on it.
///
/// Time starts at zero and only moves forward. Clones share the same state.
///
/// ```rust
/// use testkit_prepared::time::VirtualClock;
/// use std::time::Duration;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Duration::ZERO);
/// ```
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    inner: Arc<ClockInner>,
}

#[derive(Debug, Default)]
struct ClockInner {
    now: Mutex<Duration>,
    timers: Mutex<TimerQueue>,
}

impl VirtualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        *self.inner.now.lock()
    }

    /// Number of registered timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().pending.len()
    }

    /// Moves the clock forward to `time`. Earlier times are ignored.
    pub(crate) fn advance_to(&self, time: Duration) {
        let mut now = self.inner.now.lock();
        if time > *now {
            *now = time;
        }
    }

    pub(crate) fn register(&self, deadline: Duration, scope: Scope, waker: &Waker) -> TimerKey {
        self.inner.timers.lock().register(deadline, scope, waker)
    }

    pub(crate) fn update_waker(&self, key: TimerKey, waker: &Waker) {
        self.inner.timers.lock().update_waker(key, waker);
    }

    pub(crate) fn cancel(&self, key: TimerKey) {
        self.inner.timers.lock().pending.remove(&key);
    }

    /// Deadline and scope of the earliest pending timer.
    pub(crate) fn next_timer(&self) -> Option<(Duration, Scope)> {
        self.inner
            .timers
            .lock()
            .pending
            .first_key_value()
            .map(|((deadline, _), entry)| (*deadline, entry.scope))
    }

    pub(crate) fn has_foreground_timer(&self) -> bool {
        self.inner
            .timers
            .lock()
            .pending
            .values()
            .any(|entry| entry.scope == Scope::Foreground)
    }

    /// Fires every timer due at the current time. Returns how many fired.
    pub(crate) fn fire_due(&self) -> usize {
        let now = self.now();
        // wake outside the lock: wakers reach into the scheduler queues
        let wakers = self.inner.timers.lock().take_due(now);
        let fired = wakers.len();
        for waker in wakers {
            waker.wake();
        }
        fired
    }
}
