//! Bounded "suspend until condition" polling.
//!
//! All the busy-waits of the core (reference lock, PPS edges) are expressed as
//! a check retried on a fixed interval with a hard cap on attempts.

use std::time::Duration;

/// Something that can block the calling thread for a while
pub trait Sleeper {
    fn sleep(&self, dur: Duration);
}

/// Real sleeps on the calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, dur: Duration) {
        (**self).sleep(dur)
    }
}

/// Retry cadence for a check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Enough attempts at `interval` to cover `timeout`
    pub fn with_timeout(interval: Duration, timeout: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            (timeout.as_nanos() / interval.as_nanos()).max(1)
        };
        Self::new(interval, attempts.min(u32::MAX as u128) as u32)
    }
}

/// Run `check` until it yields a value or the policy runs out of attempts.
///
/// `check` gets the zero-based attempt number. There is no sleep after the
/// last attempt. Returns `Ok(None)` when every attempt came back empty; errors
/// from the check end the poll immediately.
pub fn poll_until<T, E, S, F>(policy: &PollPolicy, sleeper: &S, mut check: F) -> Result<Option<T>, E>
where
    S: Sleeper + ?Sized,
    F: FnMut(u32) -> Result<Option<T>, E>,
{
    for attempt in 0..policy.max_attempts {
        if let Some(value) = check(attempt)? {
            return Ok(Some(value));
        }
        if attempt + 1 < policy.max_attempts {
            sleeper.sleep(policy.interval);
        }
    }
    Ok(None)
}
