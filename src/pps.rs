//! PPS edge detection and trigger scheduling

use std::time::Duration;

use tracing::{debug, info};

use crate::{
    device::{DeviceTime, Radio},
    error::{Error, Result},
    poll::{poll_until, PollPolicy, Sleeper, ThreadSleeper},
};

/// How far the edge latched after arming may sit from the scheduled time
const TRIGGER_TOLERANCE_NS: i128 = 1_000_000;

/// A PPS edge as seen on the device clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PpsEvent {
    pub edge_time: DeviceTime,
}

pub struct PpsSynchronizer<S = ThreadSleeper> {
    policy: PollPolicy,
    sleeper: S,
}

impl PpsSynchronizer {
    pub fn new(policy: PollPolicy) -> Self {
        Self::with_sleeper(policy, ThreadSleeper)
    }
}

impl Default for PpsSynchronizer {
    /// 1 ms cadence, giving up after two and a half seconds without an edge
    fn default() -> Self {
        Self::new(PollPolicy::with_timeout(
            Duration::from_millis(1),
            Duration::from_millis(2500),
        ))
    }
}

impl<S: Sleeper> PpsSynchronizer<S> {
    pub fn with_sleeper(policy: PollPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// Block until the last-PPS time moves past its current value
    pub fn wait_for_next_edge<R: Radio>(&self, radio: &mut R) -> Result<PpsEvent> {
        let baseline = radio.time_last_pps()?;
        self.wait_for_edge_after(radio, baseline)
    }

    /// Block until the last-PPS time is strictly greater than `baseline`.
    ///
    /// Repeated identical reads are not edges, and neither is a value that
    /// went backwards.
    pub fn wait_for_edge_after<R: Radio>(
        &self,
        radio: &mut R,
        baseline: DeviceTime,
    ) -> Result<PpsEvent> {
        poll_until(&self.policy, &self.sleeper, |_| {
            let last = radio.time_last_pps()?;
            Ok::<_, Error>((last > baseline).then_some(last))
        })?
        .map(|edge_time| PpsEvent { edge_time })
        .ok_or(Error::NoPpsEdge {
            attempts: self.policy.max_attempts,
        })
    }

    /// Latch `at` into the device clock on the next PPS edge and wait for it.
    ///
    /// `at` has to be later than the edge currently reported, otherwise the
    /// latched edge could not be told apart from the old one. The returned
    /// edge must read back as `at`; anything else means an edge slipped in
    /// between reading the current edge and arming.
    pub fn arm_trigger<R: Radio>(&self, radio: &mut R, at: DeviceTime) -> Result<PpsEvent> {
        let current = radio.time_last_pps()?;
        if at <= current {
            return Err(Error::InvalidConfig(format!(
                "trigger time {at} is not after the current PPS edge {current}"
            )));
        }
        radio.set_time_next_pps(at)?;
        debug!(%at, %current, "Scheduled time latch on next PPS");

        let edge = self.wait_for_edge_after(radio, current)?;
        let offset_ns = (edge.edge_time - at).total_nanoseconds();
        if offset_ns.abs() > TRIGGER_TOLERANCE_NS {
            return Err(Error::TriggerMisaligned {
                expected: at,
                observed: edge.edge_time,
            });
        }
        info!(edge = %edge.edge_time, "Trigger armed on PPS edge");
        Ok(edge)
    }
}
