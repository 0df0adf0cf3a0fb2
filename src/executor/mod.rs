//! Deterministic task execution on virtual time
//!
//! The [`Scheduler`] owns the tasks of one test run and the [`VirtualClock`]
//! their timers are registered on. Nothing runs on its own: tasks are polled
//! only while the scheduler is driven, and time only moves when it is advanced.
//!
//! Tasks are either [`Scope::Foreground`] (the run waits for them) or
//! [`Scope::Background`] (cancelled when the run finishes). Timers inherit the
//! scope of the task that registers them.
//!
//! # Example
//!
//! ```rust
//! use testkit_prepared::executor::{Scheduler, Scope};
//!
//! let scheduler = Scheduler::new();
//! scheduler.spawn(Scope::Foreground, async { 1 + 1 });
//! scheduler.spawn(Scope::Foreground, async { 2 + 2 });
//!
//! assert_eq!(scheduler.ready_count(), 2);
//! scheduler.step();
//! scheduler.step();
//! assert_eq!(scheduler.live_count(Scope::Foreground), 0);
//! ```
//!
//! [`VirtualClock`]: crate::time::VirtualClock

mod scheduler;
mod task;

pub use scheduler::Scheduler;
pub(crate) use scheduler::panic_message;
pub(crate) use task::CurrentTask;
pub use task::{JoinHandle, Scope, TaskId};
