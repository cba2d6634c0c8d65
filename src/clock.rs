//! Reference clock selection with lock verification and internal fallback

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    device::{ClockSource, Radio, REF_LOCKED_SENSOR},
    error::{Error, Result},
    poll::{poll_until, PollPolicy, Sleeper, ThreadSleeper},
};

/// The clock setup actually in effect, as read back from the device
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockConfiguration {
    pub source: ClockSource,
    pub time_source: ClockSource,
    pub locked: bool,
    pub master_clock_rate_hz: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Unconfigured,
    AwaitingLock,
    Locked,
    FallbackInternal,
    /// The internal source was asked for, nothing to lock to
    Internal,
}

#[derive(Clone, Debug)]
pub struct ClockOptions {
    pub requested: ClockSource,
    /// Left as the driver default when `None`
    pub master_clock_rate_hz: Option<f64>,
    pub lock_poll: PollPolicy,
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self {
            requested: ClockSource::External,
            master_clock_rate_hz: None,
            lock_poll: PollPolicy::new(Duration::from_secs(1), 10),
        }
    }
}

pub struct ClockSourceNegotiator<S = ThreadSleeper> {
    options: ClockOptions,
    sleeper: S,
    state: NegotiationState,
}

impl ClockSourceNegotiator {
    pub fn new(options: ClockOptions) -> Self {
        Self::with_sleeper(options, ThreadSleeper)
    }
}

impl<S: Sleeper> ClockSourceNegotiator<S> {
    pub fn with_sleeper(options: ClockOptions, sleeper: S) -> Self {
        Self {
            options,
            sleeper,
            state: NegotiationState::Unconfigured,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Select the requested reference and wait for it to lock.
    ///
    /// An external reference that never reports `ref_locked` is not an error:
    /// the device is put back on its internal clock and time source and the
    /// returned configuration says so. Only driver failures are returned as
    /// errors.
    pub fn negotiate<R: Radio>(&mut self, radio: &mut R) -> Result<ClockConfiguration> {
        if self.state != NegotiationState::Unconfigured {
            return Err(Error::InvalidConfig(
                "clock reference already negotiated for this session".to_owned(),
            ));
        }
        self.select(radio, self.options.requested)?;
        if let Some(hz) = self.options.master_clock_rate_hz {
            radio.set_master_clock_rate(hz)?;
        }

        let locked = match self.options.requested {
            ClockSource::Internal => {
                self.state = NegotiationState::Internal;
                false
            }
            ClockSource::External => {
                self.state = NegotiationState::AwaitingLock;
                let policy = self.options.lock_poll;
                let locked = poll_until(&policy, &self.sleeper, |attempt| {
                    let locked = radio.sensor_bool(REF_LOCKED_SENSOR)?;
                    debug!(attempt, locked, "Polled reference lock");
                    Ok::<_, Error>(locked.then_some(()))
                })?
                .is_some();
                if locked {
                    self.state = NegotiationState::Locked;
                } else {
                    warn!(
                        attempts = policy.max_attempts,
                        "External reference not locked, switching to internal clock and time source"
                    );
                    self.select(radio, ClockSource::Internal)?;
                    self.state = NegotiationState::FallbackInternal;
                }
                locked
            }
        };

        let config = ClockConfiguration {
            source: radio.clock_source()?,
            time_source: radio.time_source()?,
            locked,
            master_clock_rate_hz: radio.master_clock_rate()?,
        };
        info!(
            clock_source = %config.source,
            time_source = %config.time_source,
            locked = config.locked,
            master_clock_mhz = config.master_clock_rate_hz / 1e6,
            "Clock reference negotiated"
        );
        Ok(config)
    }

    fn select<R: Radio>(&self, radio: &mut R, source: ClockSource) -> Result<()> {
        radio.set_clock_source(source)?;
        radio.set_time_source(source)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::{
        error::DeviceError,
        fake::{FakeRadio, RecordingSleeper},
    };

    fn options(requested: ClockSource) -> ClockOptions {
        ClockOptions {
            requested,
            master_clock_rate_hz: Some(32e6),
            ..Default::default()
        }
    }

    #[test]
    fn test_locks_on_third_poll() {
        let mut radio = FakeRadio {
            lock_script: VecDeque::from([false, false, true]),
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let mut neg = ClockSourceNegotiator::with_sleeper(options(ClockSource::External), &sleeper);
        let config = neg.negotiate(&mut radio).unwrap();
        assert_eq!(config.source, ClockSource::External);
        assert_eq!(config.time_source, ClockSource::External);
        assert!(config.locked);
        assert_eq!(config.master_clock_rate_hz, 32e6);
        assert_eq!(neg.state(), NegotiationState::Locked);
        assert_eq!(radio.sensor_reads, 3);
        assert_eq!(sleeper.total(), Duration::from_secs(2));
    }

    #[test]
    fn test_falls_back_after_ten_failed_polls() {
        let mut radio = FakeRadio::default();
        let sleeper = RecordingSleeper::default();
        let mut neg = ClockSourceNegotiator::with_sleeper(options(ClockSource::External), &sleeper);
        let config = neg.negotiate(&mut radio).unwrap();
        assert_eq!(config.source, ClockSource::Internal);
        assert_eq!(config.time_source, ClockSource::Internal);
        assert!(!config.locked);
        assert_eq!(neg.state(), NegotiationState::FallbackInternal);
        assert_eq!(radio.sensor_reads, 10);
    }

    #[test]
    fn test_internal_request_skips_lock_polling() {
        let mut radio = FakeRadio::default();
        let sleeper = RecordingSleeper::default();
        let mut neg = ClockSourceNegotiator::with_sleeper(options(ClockSource::Internal), &sleeper);
        let config = neg.negotiate(&mut radio).unwrap();
        assert_eq!(config.source, ClockSource::Internal);
        assert!(!config.locked);
        assert_eq!(neg.state(), NegotiationState::Internal);
        assert_eq!(radio.sensor_reads, 0);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn test_second_negotiation_rejected() {
        let mut radio = FakeRadio {
            lock_script: VecDeque::from([true]),
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let mut neg = ClockSourceNegotiator::with_sleeper(options(ClockSource::External), &sleeper);
        neg.negotiate(&mut radio).unwrap();
        assert!(matches!(
            neg.negotiate(&mut radio),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(neg.state(), NegotiationState::Locked);
    }

    #[test]
    fn test_rejected_clock_source_is_fatal() {
        let mut radio = FakeRadio {
            fail_clock_source: true,
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let mut neg = ClockSourceNegotiator::with_sleeper(options(ClockSource::External), &sleeper);
        assert!(matches!(
            neg.negotiate(&mut radio),
            Err(Error::Device(DeviceError::Command {
                operation: "set_clock_source",
                ..
            }))
        ));
        assert_eq!(neg.state(), NegotiationState::Unconfigured);
        assert_eq!(radio.sensor_reads, 0);
    }
}
