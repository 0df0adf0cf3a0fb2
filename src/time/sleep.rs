//! Delay and timeout futures driven by the virtual clock.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;

use super::clock::{TimerKey, VirtualClock};
use crate::error::{Error, Result};
use crate::executor::{CurrentTask, Scope};

/// A future that completes once virtual time reaches its deadline.
///
/// Created by [`Time::delay`](super::Time::delay) and
/// [`Time::delay_until`](super::Time::delay_until). The timer is registered on
/// first poll, under the scope of the task polling it, and removed on drop.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Delay {
    clock: VirtualClock,
    deadline: Duration,
    key: Option<TimerKey>,
}

impl Delay {
    pub(crate) fn until(clock: VirtualClock, deadline: Duration) -> Self {
        Self {
            clock,
            deadline,
            key: None,
        }
    }

    /// The virtual time at which this delay completes.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Time left until the deadline, `Duration::ZERO` once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.clock.now())
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.clock.now() >= this.deadline {
            if let Some(key) = this.key.take() {
                this.clock.cancel(key);
            }
            return Poll::Ready(());
        }

        match this.key {
            Some(key) => this.clock.update_waker(key, cx.waker()),
            None => {
                let scope = CurrentTask::scope().unwrap_or(Scope::Foreground);
                this.key = Some(this.clock.register(this.deadline, scope, cx.waker()));
            }
        }
        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.clock.cancel(key);
        }
    }
}

pin_project! {
    /// Fails with [`Error::Elapsed`] if the inner future does not complete
    /// within the given virtual duration.
    ///
    /// Created by [`Time::timeout`](super::Time::timeout).
    #[derive(Debug)]
    #[must_use = "futures do nothing unless polled"]
    pub struct Timeout<F> {
        #[pin]
        future: F,
        delay: Delay,
        duration: Duration,
    }
}

impl<F> Timeout<F> {
    pub(crate) fn new(future: F, delay: Delay, duration: Duration) -> Self {
        Self {
            future,
            delay,
            duration,
        }
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(output) = this.future.poll(cx) {
            return Poll::Ready(Ok(output));
        }
        match Pin::new(this.delay).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Error::Elapsed(*this.duration))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn test_delay_registers_on_first_poll() {
        let clock = VirtualClock::new();
        let mut delay = Delay::until(clock.clone(), Duration::from_secs(1));
        assert_eq!(clock.pending_timers(), 0);

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut delay).poll(&mut cx).is_pending());
        assert_eq!(clock.pending_timers(), 1);
        assert!(Pin::new(&mut delay).poll(&mut cx).is_pending());
        assert_eq!(clock.pending_timers(), 1);

        clock.advance_to(Duration::from_secs(1));
        assert!(Pin::new(&mut delay).poll(&mut cx).is_ready());
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_past_deadline_is_ready_immediately() {
        let clock = VirtualClock::new();
        clock.advance_to(Duration::from_secs(5));
        let mut delay = Delay::until(clock.clone(), Duration::from_secs(2));
        assert_eq!(delay.remaining(), Duration::ZERO);

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut delay).poll(&mut cx).is_ready());
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_dropping_delay_cancels_timer() {
        let clock = VirtualClock::new();
        let mut delay = Delay::until(clock.clone(), Duration::from_secs(1));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let _ = Pin::new(&mut delay).poll(&mut cx);
        drop(delay);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_timeout_elapses() {
        let clock = VirtualClock::new();
        let duration = Duration::from_secs(1);
        let mut timeout = Box::pin(Timeout::new(
            std::future::pending::<()>(),
            Delay::until(clock.clone(), duration),
            duration,
        ));

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(timeout.as_mut().poll(&mut cx).is_pending());

        clock.advance_to(duration);
        match timeout.as_mut().poll(&mut cx) {
            Poll::Ready(Err(Error::Elapsed(d))) => assert_eq!(d, duration),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }
}
