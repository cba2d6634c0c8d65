//! The two end-to-end runs: PPS jitter measurement and triggered TDOA capture

use std::time::Duration;

use tracing::info;

use crate::{
    capture::{AcquisitionOptions, Capture, StreamAcquisitionEngine},
    clock::{ClockConfiguration, ClockOptions, ClockSourceNegotiator},
    device::{DeviceTime, Radio, StreamArgs},
    error::{Error, Result},
    monitoring::{JitterSampler, JitterSink, JitterSummary},
    poll::{PollPolicy, Sleeper},
    pps::{PpsEvent, PpsSynchronizer},
};

#[derive(Clone, Debug)]
pub struct JitterOptions {
    pub clock: ClockOptions,
    pub num_samples: usize,
    pub edge_poll: PollPolicy,
}

impl Default for JitterOptions {
    fn default() -> Self {
        Self {
            clock: ClockOptions {
                master_clock_rate_hz: Some(32e6),
                ..Default::default()
            },
            num_samples: 100,
            edge_poll: PollPolicy::with_timeout(
                Duration::from_micros(50),
                Duration::from_millis(2500),
            ),
        }
    }
}

/// Negotiate the reference, then measure `num_samples` PPS periods into `sink`
pub fn measure_jitter<R, K, S>(
    radio: &mut R,
    options: &JitterOptions,
    sink: &mut K,
    sleeper: &S,
) -> Result<(ClockConfiguration, JitterSummary)>
where
    R: Radio,
    K: JitterSink + ?Sized,
    S: Sleeper + ?Sized,
{
    let clock = ClockSourceNegotiator::with_sleeper(options.clock.clone(), sleeper).negotiate(radio)?;
    let sampler = JitterSampler::with_synchronizer(
        PpsSynchronizer::with_sleeper(options.edge_poll, sleeper),
        options.num_samples,
    );
    let summary = sampler.run(radio, &clock, sink)?;
    Ok((clock, summary))
}

#[derive(Clone, Debug)]
pub struct CaptureOptions {
    pub clock: ClockOptions,
    pub sample_rate: f64,
    pub center_freq: f64,
    pub gain: f64,
    /// Capture length in seconds
    pub duration: f64,
    /// Device time latched on the trigger edge
    pub trigger_at: DeviceTime,
    /// Wait after zeroing the device clock
    pub time_settle: Duration,
    /// Wait between creating the streamer and starting it
    pub stream_settle: Duration,
    pub edge_poll: PollPolicy,
    pub stream_args: StreamArgs,
    pub acquisition: AcquisitionOptions,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            clock: ClockOptions::default(),
            sample_rate: 15e6,
            center_freq: 2.4e9,
            gain: 40.0,
            duration: 0.005,
            trigger_at: DeviceTime::from_secs_f64(9.0),
            time_settle: Duration::from_secs(1),
            stream_settle: Duration::from_millis(500),
            edge_poll: PollPolicy::with_timeout(
                Duration::from_millis(1),
                Duration::from_millis(2500),
            ),
            stream_args: StreamArgs::default(),
            acquisition: AcquisitionOptions::default(),
        }
    }
}

/// Largest capture accepted, 8 GiB of fc32 samples
pub const MAX_CAPTURE_SAMPLES: usize = 1 << 30;

impl CaptureOptions {
    /// Samples in `duration` at `sample_rate`, between one and
    /// [`MAX_CAPTURE_SAMPLES`]
    pub fn num_samples(&self) -> Result<usize> {
        let n = (self.duration * self.sample_rate).round();
        // Written so that NaN fails too
        if !(n >= 1.0 && n <= MAX_CAPTURE_SAMPLES as f64) {
            return Err(Error::InvalidConfig(format!(
                "{} s at {} S/s is {n} samples, expected 1 to {MAX_CAPTURE_SAMPLES}",
                self.duration, self.sample_rate
            )));
        }
        Ok(n as usize)
    }
}

pub struct TdoaCapture {
    pub clock: ClockConfiguration,
    /// The edge on which `trigger_at` was latched
    pub trigger: PpsEvent,
    pub capture: Capture,
}

/// Align the device clock to PPS, arm the trigger and take one capture
pub fn tdoa_capture<R, S>(radio: &mut R, options: &CaptureOptions, sleeper: &S) -> Result<TdoaCapture>
where
    R: Radio,
    S: Sleeper + ?Sized,
{
    let num_samples = options.num_samples()?;
    let clock = ClockSourceNegotiator::with_sleeper(options.clock.clone(), sleeper).negotiate(radio)?;

    radio.set_rx_rate(options.sample_rate)?;
    radio.set_rx_freq(options.center_freq)?;
    radio.set_rx_gain(options.gain)?;
    let (rate, freq, gain) = (radio.rx_rate()?, radio.rx_freq()?, radio.rx_gain()?);
    info!(rate, freq, gain, "Front-end tuned");

    radio.set_time_now(DeviceTime::zero())?;
    sleeper.sleep(options.time_settle);

    let sync = PpsSynchronizer::with_sleeper(options.edge_poll, sleeper);
    let edge = sync.wait_for_next_edge(radio)?;
    info!(edge = %edge.edge_time, "Synchronized to PPS");
    let trigger = sync.arm_trigger(radio, options.trigger_at)?;

    let mut stream = radio.rx_stream(&options.stream_args)?;
    sleeper.sleep(options.stream_settle);

    let capture = StreamAcquisitionEngine::new(options.acquisition).acquire(radio, &mut stream, num_samples)?;
    Ok(TdoaCapture {
        clock,
        trigger,
        capture,
    })
}
