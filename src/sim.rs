//! A software front-end for running the workflows without hardware.
//!
//! Device time follows the host monotonic clock. PPS edges come every second
//! plus a configurable period error, so the jitter workflow has something to
//! measure. The receive side produces a complex tone at the requested rate,
//! paced in real time.

use std::{
    f64::consts::TAU,
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    complex::ComplexFloat,
    device::{
        ClockSource, DeviceTime, Radio, RecvOutcome, RxErrorCode, RxStream, StreamArgs,
        StreamCmd, StreamMode, REF_LOCKED_SENSOR,
    },
    error::DeviceError,
};

#[derive(Clone, Debug)]
pub struct SimOptions {
    /// Added to the nominal one second between PPS edges
    pub pps_offset_ns: i64,
    /// Failed `ref_locked` reads before an external reference locks, `None`
    /// for a reference that never locks
    pub lock_after: Option<u32>,
    /// Frequency of the tone in the received samples, relative to the centre
    pub tone_hz: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            pps_offset_ns: 0,
            lock_after: Some(2),
            tone_hz: 100e3,
        }
    }
}

pub struct SimulatedRadio {
    options: SimOptions,
    boot: Instant,
    period_ns: u128,
    clock_source: ClockSource,
    time_source: ClockSource,
    master_clock_rate: f64,
    // Device time is `base` at host instant `anchor`
    base: DeviceTime,
    anchor: Instant,
    // Time to latch on the first edge after the host instant
    pending_latch: Option<(Instant, DeviceTime)>,
    lock_reads: u32,
    rx_rate: f64,
    rx_freq: f64,
    rx_gain: f64,
}

fn signed_nanos(from: Instant, to: Instant) -> i128 {
    if to >= from {
        (to - from).as_nanos() as i128
    } else {
        -((from - to).as_nanos() as i128)
    }
}

impl SimulatedRadio {
    pub fn new(options: SimOptions) -> Result<Self, DeviceError> {
        let period_ns = 1_000_000_000i64 + options.pps_offset_ns;
        if period_ns <= 0 {
            return Err(DeviceError::Open(format!(
                "PPS offset of {} ns leaves no period",
                options.pps_offset_ns
            )));
        }
        let boot = Instant::now();
        debug!(?options, "Simulated radio up");
        Ok(Self {
            options,
            boot,
            period_ns: period_ns as u128,
            clock_source: ClockSource::Internal,
            time_source: ClockSource::Internal,
            master_clock_rate: 16e6,
            base: DeviceTime::zero(),
            anchor: boot,
            pending_latch: None,
            lock_reads: 0,
            rx_rate: 1e6,
            rx_freq: 0.0,
            rx_gain: 0.0,
        })
    }

    fn last_edge(&self, now: Instant) -> Instant {
        let edges = (now - self.boot).as_nanos() / self.period_ns;
        self.boot + Duration::from_nanos((edges * self.period_ns) as u64)
    }

    fn device_time_at(&self, host: Instant) -> DeviceTime {
        DeviceTime::from_nanos(self.base.total_nanos() + signed_nanos(self.anchor, host))
    }

    fn apply_latch(&mut self, now: Instant) {
        if let Some((armed_at, time)) = self.pending_latch {
            let edge = self.last_edge(now);
            if edge > armed_at {
                self.base = time;
                self.anchor = edge;
                self.pending_latch = None;
            }
        }
    }
}

impl Radio for SimulatedRadio {
    type Stream = SimStream;

    fn set_clock_source(&mut self, source: ClockSource) -> Result<(), DeviceError> {
        self.clock_source = source;
        Ok(())
    }

    fn set_time_source(&mut self, source: ClockSource) -> Result<(), DeviceError> {
        self.time_source = source;
        Ok(())
    }

    fn clock_source(&mut self) -> Result<ClockSource, DeviceError> {
        Ok(self.clock_source)
    }

    fn time_source(&mut self) -> Result<ClockSource, DeviceError> {
        Ok(self.time_source)
    }

    fn set_master_clock_rate(&mut self, hz: f64) -> Result<(), DeviceError> {
        if hz <= 0.0 {
            return Err(DeviceError::Command {
                operation: "set_master_clock_rate",
                message: format!("rate {hz} out of range"),
            });
        }
        self.master_clock_rate = hz;
        Ok(())
    }

    fn master_clock_rate(&mut self) -> Result<f64, DeviceError> {
        Ok(self.master_clock_rate)
    }

    fn sensor_bool(&mut self, name: &str) -> Result<bool, DeviceError> {
        if name != REF_LOCKED_SENSOR {
            return Err(DeviceError::UnknownSensor(name.to_owned()));
        }
        if self.clock_source == ClockSource::Internal {
            return Ok(true);
        }
        self.lock_reads += 1;
        Ok(matches!(self.options.lock_after, Some(n) if self.lock_reads > n))
    }

    fn time_last_pps(&mut self) -> Result<DeviceTime, DeviceError> {
        let now = Instant::now();
        self.apply_latch(now);
        Ok(self.device_time_at(self.last_edge(now)))
    }

    fn time_now(&mut self) -> Result<DeviceTime, DeviceError> {
        let now = Instant::now();
        self.apply_latch(now);
        Ok(self.device_time_at(now))
    }

    fn set_time_now(&mut self, time: DeviceTime) -> Result<(), DeviceError> {
        self.base = time;
        self.anchor = Instant::now();
        self.pending_latch = None;
        Ok(())
    }

    fn set_time_next_pps(&mut self, time: DeviceTime) -> Result<(), DeviceError> {
        self.pending_latch = Some((Instant::now(), time));
        Ok(())
    }

    fn set_rx_rate(&mut self, hz: f64) -> Result<(), DeviceError> {
        if hz <= 0.0 {
            return Err(DeviceError::Command {
                operation: "set_rx_rate",
                message: format!("rate {hz} out of range"),
            });
        }
        self.rx_rate = hz;
        Ok(())
    }

    fn rx_rate(&mut self) -> Result<f64, DeviceError> {
        Ok(self.rx_rate)
    }

    fn set_rx_freq(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.rx_freq = hz;
        Ok(())
    }

    fn rx_freq(&mut self) -> Result<f64, DeviceError> {
        Ok(self.rx_freq)
    }

    fn set_rx_gain(&mut self, db: f64) -> Result<(), DeviceError> {
        self.rx_gain = db;
        Ok(())
    }

    fn rx_gain(&mut self) -> Result<f64, DeviceError> {
        Ok(self.rx_gain)
    }

    fn rx_stream(&mut self, args: &StreamArgs) -> Result<SimStream, DeviceError> {
        if args.cpu_format != "fc32" {
            return Err(DeviceError::Stream(format!(
                "unsupported host format {}",
                args.cpu_format
            )));
        }
        Ok(SimStream {
            rate: self.rx_rate,
            step: TAU * self.options.tone_hz / self.rx_rate,
            phase: 0.0,
            started: None,
            delivered: 0,
        })
    }
}

pub struct SimStream {
    rate: f64,
    step: f64,
    phase: f64,
    started: Option<Instant>,
    delivered: u64,
}

impl RxStream for SimStream {
    fn issue_stream_cmd(&mut self, cmd: StreamCmd) -> Result<(), DeviceError> {
        match cmd.mode {
            StreamMode::StartContinuous => {
                self.started = Some(Instant::now());
                self.delivered = 0;
            }
            StreamMode::StopContinuous => self.started = None,
        }
        Ok(())
    }

    fn recv(
        &mut self,
        buf: &mut [ComplexFloat],
        timeout: Duration,
    ) -> Result<RecvOutcome, DeviceError> {
        let started = match self.started {
            Some(t) => t,
            None => {
                thread::sleep(timeout);
                return Ok(RecvOutcome::error(RxErrorCode::Timeout));
            }
        };
        // Deliver no faster than the sample clock would, handing back a short
        // packet when the whole buffer would not accrue within the timeout
        let deadline = Instant::now() + timeout;
        let accrued = ((deadline - started).as_secs_f64() * self.rate).floor() as u64;
        let count = accrued
            .saturating_sub(self.delivered)
            .min(buf.len() as u64);
        if count == 0 {
            thread::sleep(timeout);
            return Ok(RecvOutcome::error(RxErrorCode::Timeout));
        }
        let due = started + Duration::from_secs_f64((self.delivered + count) as f64 / self.rate);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
        let count = count as usize;
        for slot in &mut buf[..count] {
            *slot = ComplexFloat::new(self.phase.cos() as f32, self.phase.sin() as f32);
            self.phase = (self.phase + self.step) % TAU;
        }
        self.delivered += count as u64;
        Ok(RecvOutcome::ok(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AcquisitionOptions, CaptureOutcome, StreamAcquisitionEngine};

    #[test]
    fn test_zero_period_rejected() {
        let got = SimulatedRadio::new(SimOptions {
            pps_offset_ns: -1_000_000_000,
            ..Default::default()
        });
        assert!(matches!(got, Err(DeviceError::Open(_))));
    }

    #[test]
    fn test_external_reference_locks_after_configured_reads() {
        let mut radio = SimulatedRadio::new(SimOptions {
            lock_after: Some(2),
            ..Default::default()
        })
        .unwrap();
        radio.set_clock_source(ClockSource::External).unwrap();
        assert!(!radio.sensor_bool(REF_LOCKED_SENSOR).unwrap());
        assert!(!radio.sensor_bool(REF_LOCKED_SENSOR).unwrap());
        assert!(radio.sensor_bool(REF_LOCKED_SENSOR).unwrap());
        assert!(radio.sensor_bool("gps_locked").is_err());
    }

    #[test]
    fn test_time_now_follows_set_time() {
        let mut radio = SimulatedRadio::new(SimOptions::default()).unwrap();
        radio.set_time_now(DeviceTime::from_secs_f64(100.0)).unwrap();
        let t = radio.time_now().unwrap();
        assert!(t >= DeviceTime::from_secs_f64(100.0));
        assert!(t < DeviceTime::from_secs_f64(100.5));
        assert!(radio.time_last_pps().unwrap() <= t);
    }

    #[test]
    fn test_stream_delivers_unit_tone_once_started() {
        let mut radio = SimulatedRadio::new(SimOptions::default()).unwrap();
        radio.set_rx_rate(10e6).unwrap();
        let mut stream = radio.rx_stream(&StreamArgs::default()).unwrap();
        let mut buf = vec![ComplexFloat::default(); 1000];

        let idle = stream.recv(&mut buf, Duration::from_millis(1)).unwrap();
        assert_eq!(idle.error_code, RxErrorCode::Timeout);

        stream.issue_stream_cmd(StreamCmd::start_continuous_now()).unwrap();
        let rx = stream.recv(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(rx, RecvOutcome::ok(1000));
        for s in &buf {
            assert!((s.norm_sqr() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_low_rate_stream_returns_short_packets() {
        let mut radio = SimulatedRadio::new(SimOptions::default()).unwrap();
        radio.set_rx_rate(10e3).unwrap();
        let mut stream = radio.rx_stream(&StreamArgs::default()).unwrap();
        let mut buf = vec![ComplexFloat::default(); 32768];

        stream.issue_stream_cmd(StreamCmd::start_continuous_now()).unwrap();
        let rx = stream.recv(&mut buf, Duration::from_millis(20)).unwrap();
        assert_eq!(rx.error_code, RxErrorCode::None);
        assert!(rx.count > 0);
        assert!(rx.count < buf.len());
    }

    #[test]
    fn test_low_rate_capture_completes() {
        let mut radio = SimulatedRadio::new(SimOptions::default()).unwrap();
        radio.set_rx_rate(10e3).unwrap();
        let mut stream = radio.rx_stream(&StreamArgs::default()).unwrap();
        let engine = StreamAcquisitionEngine::new(AcquisitionOptions {
            recv_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        let capture = engine.acquire(&mut radio, &mut stream, 50).unwrap();
        assert_eq!(capture.outcome, CaptureOutcome::Complete);
        assert_eq!(capture.buffer.len(), 50);
    }
}
