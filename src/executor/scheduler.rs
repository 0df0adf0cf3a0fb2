//! The cooperative virtual-time scheduler.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::task::{CurrentTask, JoinHandle, Scope, Task, TaskId};
use crate::error::{Error, Result};
use crate::time::VirtualClock;

/// Single-threaded, deterministic scheduler driven by a [`VirtualClock`].
///
/// Tasks only run when the scheduler is driven, on the driving thread. Timers
/// fire in deadline order, ties in registration order. Wakers are `Send + Sync`:
/// a real thread may wake a task, which unparks the driver.
///
/// ```rust
/// use testkit_prepared::executor::{Scheduler, Scope};
///
/// let scheduler = Scheduler::new();
/// let handle = scheduler.spawn(Scope::Foreground, async { 42 });
/// assert!(!handle.is_finished());
///
/// scheduler.run_until_stalled();
/// assert_eq!(handle.try_take(), Some(42));
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

pub(crate) struct SchedulerInner {
    clock: VirtualClock,
    /// Tasks ready to be polled.
    ready: Mutex<VecDeque<Task>>,
    /// Tasks that returned `Pending` and wait for a wake.
    waiting: Mutex<Vec<Task>>,
    foreground: AtomicUsize,
    background: AtomicUsize,
    failure: Mutex<Option<Error>>,
    /// Virtual time of the last poll of a foreground task.
    last_foreground_progress: Mutex<Duration>,
    parker: Parker,
}

#[derive(Default)]
struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn unpark(&self) {
        *self.notified.lock() = true;
        self.condvar.notify_one();
    }

    /// Waits for an unpark for at most `timeout` of real time.
    /// Returns `false` if nothing woke the driver in time.
    fn park(&self, timeout: Duration) -> bool {
        let mut notified = self.notified.lock();
        if !*notified {
            let result = self.condvar.wait_for(&mut notified, timeout);
            if result.timed_out() && !*notified {
                return false;
            }
        }
        *notified = false;
        true
    }
}

impl SchedulerInner {
    fn counter(&self, scope: Scope) -> &AtomicUsize {
        match scope {
            Scope::Foreground => &self.foreground,
            Scope::Background => &self.background,
        }
    }

    /// Moves a waiting task to the ready queue, or flags it if it is being polled.
    fn wake(&self, id: TaskId, woken_during_poll: &AtomicBool) {
        {
            // lock order: waiting, then ready
            let mut waiting = self.waiting.lock();
            if let Some(pos) = waiting.iter().position(|t| t.id == id) {
                let task = waiting.swap_remove(pos);
                self.ready.lock().push_back(task);
            } else {
                woken_during_poll.store(true, Ordering::SeqCst);
            }
        }
        self.parker.unpark();
    }

    fn retire(&self, task: Task) {
        self.counter(task.scope).fetch_sub(1, Ordering::SeqCst);
        drop(task);
    }

    /// Drops the queued tasks matching `predicate`. Returns how many were dropped.
    fn cancel_where(&self, predicate: impl Fn(&Task) -> bool) -> usize {
        let mut cancelled = Vec::new();
        {
            let mut waiting = self.waiting.lock();
            let mut ready = self.ready.lock();
            let mut i = 0;
            while i < waiting.len() {
                if predicate(&waiting[i]) {
                    cancelled.push(waiting.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            let (matching, kept): (VecDeque<_>, VecDeque<_>) =
                ready.drain(..).partition(|task| predicate(task));
            *ready = kept;
            cancelled.extend(matching);
        }
        // dropping a task may wake others, so no queue lock may be held here
        let count = cancelled.len();
        for task in cancelled {
            tracing::debug!(task = %task.name, scope = %task.scope, "cancelling task");
            self.retire(task);
        }
        count
    }

    pub(crate) fn cancel_task(&self, id: TaskId) -> bool {
        self.cancel_where(|task| task.id == id) > 0
    }
}

struct TaskWaker {
    scheduler: Weak<SchedulerInner>,
    id: TaskId,
    woken_during_poll: Arc<AtomicBool>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.wake(self.id, &self.woken_during_poll);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler with a fresh clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock: VirtualClock::new(),
                ready: Mutex::new(VecDeque::new()),
                waiting: Mutex::new(Vec::new()),
                foreground: AtomicUsize::new(0),
                background: AtomicUsize::new(0),
                failure: Mutex::new(None),
                last_foreground_progress: Mutex::new(Duration::ZERO),
                parker: Parker::default(),
            }),
        }
    }

    /// The clock driving this scheduler's timers.
    #[must_use]
    pub fn clock(&self) -> &VirtualClock {
        &self.inner.clock
    }

    /// Spawns a future. It does not run until the scheduler is driven.
    pub fn spawn<F, T>(&self, scope: Scope, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_named(scope, "task", future)
    }

    /// Spawns a named future. The name shows in logs and panic reports.
    pub fn spawn_named<F, T>(&self, scope: Scope, name: &str, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = Task::new(scope, name.to_string(), future, Arc::downgrade(&self.inner));
        self.inner.counter(scope).fetch_add(1, Ordering::SeqCst);
        self.inner.ready.lock().push_back(task);
        self.inner.parker.unpark();
        handle
    }

    /// Number of live tasks in `scope`, queued or waiting.
    #[must_use]
    pub fn live_count(&self, scope: Scope) -> usize {
        self.inner.counter(scope).load(Ordering::SeqCst)
    }

    /// Number of tasks ready to be polled.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.inner.ready.lock().len()
    }

    /// Polls a single task from the ready queue.
    ///
    /// Returns `true` if a task was polled, `false` if the ready queue was empty.
    /// A panicking task is dropped and recorded as the run's failure.
    pub fn step(&self) -> bool {
        let Some(mut task) = self.inner.ready.lock().pop_front() else {
            return false;
        };

        let woken = Arc::clone(&task.woken);
        woken.store(false, Ordering::SeqCst);
        let waker = Waker::from(Arc::new(TaskWaker {
            scheduler: Arc::downgrade(&self.inner),
            id: task.id,
            woken_during_poll: Arc::clone(&woken),
        }));
        let mut cx = Context::from_waker(&waker);

        if task.scope == Scope::Foreground {
            *self.inner.last_foreground_progress.lock() = self.inner.clock.now();
        }

        let polled = {
            let _current = CurrentTask::enter(task.id, task.scope);
            panic::catch_unwind(AssertUnwindSafe(|| task.poll(&mut cx)))
        };

        match polled {
            Ok(Poll::Ready(())) => {
                tracing::debug!(task = %task.name, polls = task.poll_count, "task completed");
                self.inner.retire(task);
            }
            Ok(Poll::Pending) => {
                let mut waiting = self.inner.waiting.lock();
                if woken.load(Ordering::SeqCst) {
                    self.inner.ready.lock().push_back(task);
                } else {
                    waiting.push(task);
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::debug!(task = %task.name, %message, "task panicked");
                self.fail(Error::Panicked {
                    task: task.name.clone(),
                    message,
                });
                self.inner.retire(task);
            }
        }
        true
    }

    /// Polls ready tasks until none are ready. Returns the number of polls.
    pub fn run_until_stalled(&self) -> usize {
        let mut count = 0;
        while self.step() {
            count += 1;
        }
        count
    }

    /// Runs every task due at or before the current virtual time, until stalled.
    pub fn run_current(&self) {
        loop {
            let fired = self.inner.clock.fire_due();
            let polled = self.run_until_stalled();
            if fired == 0 && polled == 0 {
                break;
            }
        }
    }

    /// Runs every task scheduled strictly before `target`, in time order, then
    /// sets the clock to `target`. Tasks due exactly at `target` are left for
    /// [`run_current`](Self::run_current).
    pub fn advance_to(&self, target: Duration) {
        loop {
            self.run_current();
            match self.inner.clock.next_timer() {
                Some((deadline, _)) if deadline < target => self.inner.clock.advance_to(deadline),
                _ => break,
            }
        }
        self.inner.clock.advance_to(target);
    }

    /// Runs tasks and jumps to the next timer while any foreground timer
    /// remains. The clock is left at the last executed deadline.
    pub fn advance_until_idle(&self) {
        loop {
            self.run_current();
            if !self.inner.clock.has_foreground_timer() {
                break;
            }
            match self.inner.clock.next_timer() {
                Some((deadline, _)) => self.inner.clock.advance_to(deadline),
                None => break,
            }
        }
    }

    /// Records the run's failure. Only the first failure is kept.
    pub(crate) fn fail(&self, error: Error) {
        let mut failure = self.inner.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    pub(crate) fn take_failure(&self) -> Option<Error> {
        self.inner.failure.lock().take()
    }

    /// Drops every queued task of `scope`. Returns how many were cancelled.
    pub fn cancel_scope(&self, scope: Scope) -> usize {
        self.inner.cancel_where(|task| task.scope == scope)
    }

    /// Drives the scheduler until no foreground task is left.
    ///
    /// Fails with the first recorded failure (a panic, or an error reported
    /// through [`fail`](Self::fail)), or with [`Error::Timeout`] once
    /// foreground work has made no progress for `idle_timeout`: in virtual
    /// time while only background timers fire, in real time while nothing at
    /// all is scheduled.
    pub(crate) fn drive(&self, idle_timeout: Duration) -> Result<()> {
        loop {
            self.run_current();
            if let Some(error) = self.take_failure() {
                return Err(error);
            }
            if self.live_count(Scope::Foreground) == 0 {
                return Ok(());
            }

            match self.inner.clock.next_timer() {
                Some((deadline, scope)) => {
                    if scope == Scope::Background && !self.inner.clock.has_foreground_timer() {
                        let since = *self.inner.last_foreground_progress.lock();
                        if deadline.saturating_sub(since) > idle_timeout {
                            tracing::debug!(?idle_timeout, "only background timers left");
                            return Err(Error::Timeout(idle_timeout));
                        }
                    }
                    self.inner.clock.advance_to(deadline);
                }
                None => {
                    if self.ready_count() == 0 && !self.inner.parker.park(idle_timeout) {
                        tracing::debug!(?idle_timeout, "scheduler stalled");
                        return Err(Error::Timeout(idle_timeout));
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.inner.clock.now())
            .field("foreground", &self.live_count(Scope::Foreground))
            .field("background", &self.live_count(Scope::Background))
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
