//! Virtual time control
//!
//! Every test run owns a [`Time`] handle. Delays never block a thread: they park
//! the calling task on a timer of the run's [`VirtualClock`], and the clock only
//! moves when the run is driven or when the test advances it explicitly.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use testkit_prepared::time::Time;
//!
//! let time = Time::new();
//! let mark = time.source().mark_now();
//!
//! time.advance_by(Duration::from_secs(30));
//! assert_eq!(time.now_millis(), 30_000);
//! assert_eq!(mark.elapsed(), Duration::from_secs(30));
//! ```

mod clock;
mod instant;
mod sleep;

pub use clock::VirtualClock;
pub use instant::{TimeMark, TimeSource};
pub use sleep::{Delay, Timeout};

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;

use crate::error::{Error, Result};
use crate::executor::Scheduler;

/// A source of time that code under test can be written against.
///
/// Production code takes `&dyn Clock` (or `impl Clock`); tests hand it the
/// run's [`Time`] so that waiting costs no real time.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;

    /// Completes after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Time control for one test run.
///
/// Cloning is cheap; clones drive the same scheduler.
#[derive(Debug, Clone, Default)]
pub struct Time {
    scheduler: Scheduler,
}

impl Time {
    /// Time control over a fresh scheduler. Mostly useful outside of a run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_scheduler(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// The scheduler whose tasks this handle drives.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn clock(&self) -> &VirtualClock {
        self.scheduler.clock()
    }

    /// Virtual time since the start of the run.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock().now()
    }

    /// Virtual time since the start of the run, in milliseconds.
    #[must_use]
    pub fn now_millis(&self) -> u64 {
        u64::try_from(self.now().as_millis()).unwrap_or(u64::MAX)
    }

    /// A source of monotonic marks on this run's clock.
    #[must_use]
    pub fn source(&self) -> TimeSource {
        TimeSource::new(self.clock().clone())
    }

    /// The virtual wall clock. It reads [`UNIX_EPOCH`] when the run starts.
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.now()
    }

    /// Completes once `duration` of virtual time has passed.
    pub fn delay(&self, duration: Duration) -> Delay {
        Delay::until(self.clock().clone(), self.now() + duration)
    }

    /// Completes once the clock reaches `mark`. Marks in the past complete at once.
    pub fn delay_until(&self, mark: &TimeMark) -> Delay {
        Delay::until(self.clock().clone(), mark.offset())
    }

    /// Waits until the virtual wall clock reads `time`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackwardsTime`] if `time` is earlier than
    /// [`system_time`](Self::system_time).
    pub async fn set(&self, time: SystemTime) -> Result<()> {
        let requested = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let now = self.now();
        if requested < now {
            return Err(Error::BackwardsTime { now, requested });
        }
        Delay::until(self.clock().clone(), requested).await;
        Ok(())
    }

    /// Runs `future`, failing with [`Error::Elapsed`] if it does not complete
    /// within `duration` of virtual time.
    pub fn timeout<F: Future>(&self, duration: Duration, future: F) -> Timeout<F> {
        Timeout::new(future, self.delay(duration), duration)
    }

    /// Runs every task scheduled strictly before `now + duration`, in time
    /// order, then moves the clock to `now + duration`.
    ///
    /// Tasks scheduled exactly at the new time have not run yet; call
    /// [`run_current`](Self::run_current) for them.
    pub fn advance_by(&self, duration: Duration) {
        let target = self.now() + duration;
        tracing::debug!(?duration, ?target, "advancing virtual time");
        self.scheduler.advance_to(target);
    }

    /// [`advance_by`](Self::advance_by) in milliseconds.
    pub fn advance_by_millis(&self, millis: u64) {
        self.advance_by(Duration::from_millis(millis));
    }

    /// Runs every task due at the current virtual time.
    pub fn run_current(&self) {
        self.scheduler.run_current();
    }

    /// Runs tasks, moving the clock from timer to timer, until no foreground
    /// timer is left. Background timers alone do not keep this going.
    pub fn advance_until_idle(&self) {
        self.scheduler.advance_until_idle();
    }
}

impl Clock for Time {
    fn now(&self) -> Duration {
        Time::now(self)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(self.delay(duration))
    }
}
