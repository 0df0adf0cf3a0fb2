//! Monotonic marks on the virtual clock.

use std::ops::{Add, Sub};
use std::time::Duration;

use super::clock::VirtualClock;

/// Produces [`TimeMark`]s from a virtual clock.
///
/// ```rust
/// use testkit_prepared::time::VirtualClock;
/// use testkit_prepared::time::TimeSource;
///
/// let source = TimeSource::new(VirtualClock::new());
/// let mark = source.mark_now();
/// assert!(mark.elapsed().is_zero());
/// ```
#[derive(Debug, Clone)]
pub struct TimeSource {
    clock: VirtualClock,
}

impl TimeSource {
    /// A source reading `clock`.
    #[must_use]
    pub fn new(clock: VirtualClock) -> Self {
        Self { clock }
    }

    /// Marks the current virtual time.
    #[must_use]
    pub fn mark_now(&self) -> TimeMark {
        TimeMark {
            at: self.clock.now(),
            clock: self.clock.clone(),
        }
    }
}

/// A point in virtual time.
///
/// Marks compare and subtract like [`std::time::Instant`], and know how much
/// virtual time has passed since they were taken.
#[derive(Debug, Clone)]
pub struct TimeMark {
    at: Duration,
    clock: VirtualClock,
}

impl TimeMark {
    /// Virtual time since the start of the run at which this mark was taken.
    #[must_use]
    pub fn offset(&self) -> Duration {
        self.at
    }

    /// Virtual time elapsed since this mark. Zero for marks in the future.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.at)
    }

    /// Returns `true` once the clock has reached this mark.
    #[must_use]
    pub fn has_passed_now(&self) -> bool {
        self.clock.now() >= self.at
    }

    /// Time from `earlier` to this mark, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(&self, earlier: &TimeMark) -> Duration {
        self.at.saturating_sub(earlier.at)
    }
}

impl PartialEq for TimeMark {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for TimeMark {}

impl PartialOrd for TimeMark {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeMark {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at)
    }
}

impl Add<Duration> for TimeMark {
    type Output = TimeMark;

    fn add(mut self, rhs: Duration) -> TimeMark {
        self.at += rhs;
        self
    }
}

impl Sub<&TimeMark> for &TimeMark {
    type Output = Duration;

    fn sub(self, rhs: &TimeMark) -> Duration {
        self.saturating_duration_since(rhs)
    }
}
