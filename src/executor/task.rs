//! Task types for the virtual-time scheduler.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::scheduler::SchedulerInner;
use crate::error::{Error, Result};

/// Unique identifier for a spawned task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates a new unique task ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Whether the run waits for a task before finishing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The run is not finished until the task completes.
    Foreground,
    /// The task is cancelled when the run finishes.
    Background,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Foreground => write!(f, "foreground"),
            Scope::Background => write!(f, "background"),
        }
    }
}

thread_local! {
    static CURRENT: Cell<Option<(TaskId, Scope)>> = const { Cell::new(None) };
}

/// Marks a task as the one being polled on this thread until dropped.
pub(crate) struct CurrentTask {
    previous: Option<(TaskId, Scope)>,
}

impl CurrentTask {
    pub(crate) fn enter(id: TaskId, scope: Scope) -> Self {
        let previous = CURRENT.with(|current| current.replace(Some((id, scope))));
        Self { previous }
    }

    /// Scope of the task being polled on this thread, if any.
    pub(crate) fn scope() -> Option<Scope> {
        CURRENT.with(|current| current.get().map(|(_, scope)| scope))
    }
}

impl Drop for CurrentTask {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(self.previous));
    }
}

struct JoinState<T> {
    output: Option<T>,
    finished: bool,
    cancelled: bool,
    waker: Option<Waker>,
}

impl<T> JoinState<T> {
    fn finish(&mut self) {
        self.finished = true;
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// Stores the task output, or marks the task cancelled if dropped before completion.
struct CompletionGuard<T> {
    state: Arc<Mutex<JoinState<T>>>,
    completed: bool,
}

impl<T> CompletionGuard<T> {
    fn complete(mut self, output: T) {
        self.completed = true;
        let mut state = self.state.lock();
        state.output = Some(output);
        state.finish();
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if !self.completed {
            let mut state = self.state.lock();
            state.cancelled = true;
            state.finish();
        }
    }
}

/// Handle to a launched task.
///
/// Awaiting the handle yields the task's output, or [`Error::Cancelled`] if the
/// task was cancelled (or panicked) first.
pub struct JoinHandle<T> {
    /// The task's unique identifier.
    pub id: TaskId,
    state: Arc<Mutex<JoinState<T>>>,
    scheduler: Weak<SchedulerInner>,
}

impl<T> JoinHandle<T> {
    /// Returns true if the task completed or was cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Returns true if the task was cancelled before completing.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Takes the output if the task has completed.
    #[must_use]
    pub fn try_take(&self) -> Option<T> {
        self.state.lock().output.take()
    }

    /// Cancels the task if it is still queued.
    ///
    /// Returns `true` if the task was found and dropped.
    pub fn cancel(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|scheduler| scheduler.cancel_task(self.id))
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();
        if let Some(output) = state.output.take() {
            Poll::Ready(Ok(output))
        } else if state.cancelled {
            Poll::Ready(Err(Error::Cancelled))
        } else if state.finished {
            // output was already taken through try_take
            Poll::Ready(Err(Error::Cancelled))
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("is_finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Internal task representation.
pub(crate) struct Task {
    pub id: TaskId,
    pub scope: Scope,
    pub name: String,
    pub future: BoxFuture<'static, ()>,
    pub poll_count: usize,
    /// Set when the task is woken while it is being polled.
    pub woken: Arc<AtomicBool>,
}

impl Task {
    /// Creates a new task wrapping a future, and the handle observing it.
    pub fn new<F, T>(
        scope: Scope,
        name: String,
        future: F,
        scheduler: Weak<SchedulerInner>,
    ) -> (Self, JoinHandle<T>)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId::new();
        let state = Arc::new(Mutex::new(JoinState {
            output: None,
            finished: false,
            cancelled: false,
            waker: None,
        }));

        let guard = CompletionGuard {
            state: Arc::clone(&state),
            completed: false,
        };
        let wrapped = async move {
            let guard = guard;
            let output = future.await;
            guard.complete(output);
        };

        let task = Self {
            id,
            scope,
            name,
            future: Box::pin(wrapped),
            poll_count: 0,
            woken: Arc::new(AtomicBool::new(false)),
        };
        let handle = JoinHandle {
            id,
            state,
            scheduler,
        };
        (task, handle)
    }

    /// Polls the task once.
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.poll_count += 1;
        self.future.as_mut().poll(cx)
    }
}
