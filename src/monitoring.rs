//! In this module, we implement the PPS jitter measurement.
//! Every edge of the reference is timestamped on the device clock and compared
//! against the previous one; the deviation from a one second period is streamed
//! out as it is measured and summarised once collection is over.

use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::{
    clock::ClockConfiguration,
    device::{DeviceTime, Radio},
    error::{Error, Result},
    poll::{PollPolicy, Sleeper, ThreadSleeper},
    pps::PpsSynchronizer,
};

/// Nominal PPS period
pub const NOMINAL_PERIOD_NS: i128 = 1_000_000_000;
// Log progress every this many edges
const PROGRESS_EVERY: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct JitterSample {
    pub index: usize,
    pub wall_timestamp: DateTime<Local>,
    pub deviation_ns: f64,
    /// Device time of the edge, in seconds
    pub pps_time: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JitterSummary {
    pub average_ns: f64,
    pub peak_to_peak_ns: f64,
    /// Most negative deviation (edge came early)
    pub max_advance_ns: f64,
    /// Most positive deviation (edge came late)
    pub max_delay_ns: f64,
}

impl JitterSummary {
    /// `None` for an empty sequence
    pub fn from_deviations(deviations: &[f64]) -> Option<Self> {
        if deviations.is_empty() {
            return None;
        }
        let (min, max) = deviations
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &d| {
                (lo.min(d), hi.max(d))
            });
        let average_ns = deviations.iter().sum::<f64>() / deviations.len() as f64;
        Some(Self {
            average_ns,
            peak_to_peak_ns: max - min,
            max_advance_ns: min,
            max_delay_ns: max,
        })
    }
}

/// Period error between two consecutive edges, in nanoseconds
pub fn deviation_ns(prev: DeviceTime, curr: DeviceTime) -> f64 {
    ((curr - prev).total_nanoseconds() - NOMINAL_PERIOD_NS) as f64
}

/// Receives jitter results as they are produced
pub trait JitterSink {
    /// Called once, before the first sample
    fn begin(&mut self, clock: &ClockConfiguration) -> Result<()>;
    fn record(&mut self, sample: &JitterSample) -> Result<()>;
    fn finish(&mut self, summary: &JitterSummary) -> Result<()>;
}

pub struct JitterSampler<S = ThreadSleeper> {
    sync: PpsSynchronizer<S>,
    num_samples: usize,
}

impl JitterSampler {
    /// Polls at 50 us so edge detection latency stays well under the jitter
    /// being measured
    pub fn new(num_samples: usize) -> Self {
        let policy = PollPolicy::with_timeout(Duration::from_micros(50), Duration::from_millis(2500));
        Self::with_synchronizer(PpsSynchronizer::new(policy), num_samples)
    }
}

impl<S: Sleeper> JitterSampler<S> {
    pub fn with_synchronizer(sync: PpsSynchronizer<S>, num_samples: usize) -> Self {
        Self { sync, num_samples }
    }

    /// Measure `num_samples` consecutive PPS periods
    pub fn run<R, K>(
        &self,
        radio: &mut R,
        clock: &ClockConfiguration,
        sink: &mut K,
    ) -> Result<JitterSummary>
    where
        R: Radio,
        K: JitterSink + ?Sized,
    {
        if self.num_samples == 0 {
            return Err(Error::InvalidConfig(
                "jitter measurement needs at least one sample".to_owned(),
            ));
        }
        sink.begin(clock)?;

        let mut deviations = Vec::with_capacity(self.num_samples);
        let mut prev = radio.time_last_pps()?;
        for index in 0..self.num_samples {
            let curr = self.sync.wait_for_edge_after(radio, prev)?.edge_time;
            let sample = JitterSample {
                index,
                wall_timestamp: Local::now(),
                deviation_ns: deviation_ns(prev, curr),
                pps_time: curr.real_secs(),
            };
            debug!(index, deviation_ns = sample.deviation_ns, edge = %curr, "PPS edge");
            sink.record(&sample)?;
            deviations.push(sample.deviation_ns);
            prev = curr;

            if (index + 1) % PROGRESS_EVERY == 0 {
                info!(collected = index + 1, total = self.num_samples, "Jitter collection progress");
            }
        }

        // Non-empty, checked above
        let summary = JitterSummary::from_deviations(&deviations)
            .ok_or_else(|| Error::InvalidConfig("no jitter samples collected".to_owned()))?;
        sink.finish(&summary)?;
        Ok(summary)
    }
}
