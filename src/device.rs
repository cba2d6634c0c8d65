//! The radio front-end as seen by the core.
//!
//! Everything the workflows need from the driver goes through [`Radio`] and
//! [`RxStream`]. The driver is a black box: clock recovery, tuning and the
//! transport all live behind these calls.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    ops::{Add, Sub},
    str::FromStr,
    time::Duration as StdDuration,
};

use hifitime::Duration;

use crate::{complex::ComplexFloat, error::DeviceError};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Name of the motherboard sensor reporting reference lock
pub const REF_LOCKED_SENSOR: &str = "ref_locked";

/// A point on the device clock, with nanosecond resolution.
///
/// Only meaningful relative to other times of the same session.
#[derive(Clone, Copy, Debug)]
pub struct DeviceTime(Duration);

impl DeviceTime {
    pub fn zero() -> Self {
        Self::from_nanos(0)
    }

    pub fn from_nanos(nanos: i128) -> Self {
        Self(Duration::from_total_nanoseconds(nanos))
    }

    /// Rounds to the nearest nanosecond
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_nanos((secs * 1e9).round() as i128)
    }

    pub fn total_nanos(&self) -> i128 {
        self.0.total_nanoseconds()
    }

    pub fn full_secs(&self) -> i64 {
        self.total_nanos().div_euclid(NANOS_PER_SEC) as i64
    }

    pub fn frac_secs(&self) -> f64 {
        self.total_nanos().rem_euclid(NANOS_PER_SEC) as f64 / 1e9
    }

    pub fn real_secs(&self) -> f64 {
        self.0.to_seconds()
    }
}

impl Default for DeviceTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for DeviceTime {
    fn eq(&self, other: &Self) -> bool {
        self.total_nanos() == other.total_nanos()
    }
}

impl Eq for DeviceTime {}

impl PartialOrd for DeviceTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeviceTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_nanos().cmp(&other.total_nanos())
    }
}

impl Sub for DeviceTime {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0 - rhs.0
    }
}

impl Add<Duration> for DeviceTime {
    type Output = DeviceTime;

    fn add(self, rhs: Duration) -> DeviceTime {
        DeviceTime(self.0 + rhs)
    }
}

impl fmt::Display for DeviceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frac_nanos = self.total_nanos().rem_euclid(NANOS_PER_SEC);
        write!(f, "{}.{:09} s", self.full_secs(), frac_nanos)
    }
}

/// Where the device takes its 10 MHz and PPS from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    External,
    Internal,
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockSource::External => write!(f, "external"),
            ClockSource::Internal => write!(f, "internal"),
        }
    }
}

impl FromStr for ClockSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external" => Ok(ClockSource::External),
            "internal" => Ok(ClockSource::Internal),
            other => Err(format!("unknown clock source '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamMode {
    StartContinuous,
    StopContinuous,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamCmd {
    pub mode: StreamMode,
    pub stream_now: bool,
}

impl StreamCmd {
    pub fn start_continuous_now() -> Self {
        Self {
            mode: StreamMode::StartContinuous,
            stream_now: true,
        }
    }

    pub fn stop_continuous() -> Self {
        Self {
            mode: StreamMode::StopContinuous,
            stream_now: true,
        }
    }
}

/// Streamer construction arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamArgs {
    /// Host-side sample format
    pub cpu_format: String,
    /// Over-the-wire sample format
    pub otw_format: String,
    /// Transport hints passed through to the driver
    pub args: BTreeMap<String, String>,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            cpu_format: "fc32".to_owned(),
            otw_format: "sc16".to_owned(),
            args: BTreeMap::from([
                ("recv_buff_size".to_owned(), "10000000".to_owned()),
                ("recv_frame_size".to_owned(), "65536".to_owned()),
                ("num_recv_frames".to_owned(), "512".to_owned()),
            ]),
        }
    }
}

/// Per-receive classification reported in the rx metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxErrorCode {
    None,
    Timeout,
    LateCommand,
    BrokenChain,
    Overflow,
    Alignment,
    BadPacket,
}

impl fmt::Display for RxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RxErrorCode::None => "no error",
            RxErrorCode::Timeout => "no packet received, implementation timed out",
            RxErrorCode::LateCommand => "a stream command was issued in the past",
            RxErrorCode::BrokenChain => "expected another stream command",
            RxErrorCode::Overflow => "an internal receive buffer has filled",
            RxErrorCode::Alignment => "multi-channel alignment failed",
            RxErrorCode::BadPacket => "the packet could not be parsed",
        };
        f.write_str(s)
    }
}

/// Result of one `recv` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecvOutcome {
    pub count: usize,
    pub error_code: RxErrorCode,
}

impl RecvOutcome {
    pub fn ok(count: usize) -> Self {
        Self {
            count,
            error_code: RxErrorCode::None,
        }
    }

    pub fn error(error_code: RxErrorCode) -> Self {
        Self {
            count: 0,
            error_code,
        }
    }
}

/// A receive streamer handed out by [`Radio::rx_stream`]
pub trait RxStream {
    fn issue_stream_cmd(&mut self, cmd: StreamCmd) -> Result<(), DeviceError>;

    /// Receive up to `buf.len()` samples, waiting at most `timeout`
    fn recv(
        &mut self,
        buf: &mut [ComplexFloat],
        timeout: StdDuration,
    ) -> Result<RecvOutcome, DeviceError>;
}

/// One exclusively-owned hardware session
pub trait Radio {
    type Stream: RxStream;

    fn set_clock_source(&mut self, source: ClockSource) -> Result<(), DeviceError>;
    fn set_time_source(&mut self, source: ClockSource) -> Result<(), DeviceError>;
    fn clock_source(&mut self) -> Result<ClockSource, DeviceError>;
    fn time_source(&mut self) -> Result<ClockSource, DeviceError>;
    fn set_master_clock_rate(&mut self, hz: f64) -> Result<(), DeviceError>;
    fn master_clock_rate(&mut self) -> Result<f64, DeviceError>;

    /// Read a boolean motherboard sensor such as [`REF_LOCKED_SENSOR`]
    fn sensor_bool(&mut self, name: &str) -> Result<bool, DeviceError>;

    fn time_last_pps(&mut self) -> Result<DeviceTime, DeviceError>;
    fn time_now(&mut self) -> Result<DeviceTime, DeviceError>;
    fn set_time_now(&mut self, time: DeviceTime) -> Result<(), DeviceError>;
    /// Latch `time` into the device clock at the next PPS edge
    fn set_time_next_pps(&mut self, time: DeviceTime) -> Result<(), DeviceError>;

    fn set_rx_rate(&mut self, hz: f64) -> Result<(), DeviceError>;
    fn rx_rate(&mut self) -> Result<f64, DeviceError>;
    fn set_rx_freq(&mut self, hz: f64) -> Result<(), DeviceError>;
    fn rx_freq(&mut self) -> Result<f64, DeviceError>;
    fn set_rx_gain(&mut self, db: f64) -> Result<(), DeviceError>;
    fn rx_gain(&mut self) -> Result<f64, DeviceError>;

    fn rx_stream(&mut self, args: &StreamArgs) -> Result<Self::Stream, DeviceError>;
}
