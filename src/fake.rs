//! Scripted stand-ins for the front-end, used by the unit tests

use std::{cell::RefCell, collections::VecDeque, rc::Rc, time::Duration};

use crate::{
    complex::ComplexFloat,
    device::{
        ClockSource, DeviceTime, Radio, RecvOutcome, RxErrorCode, RxStream, StreamArgs, StreamCmd,
        StreamMode,
    },
    error::DeviceError,
    poll::Sleeper,
};

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn count(&self) -> usize {
        self.sleeps.borrow().len()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, dur: Duration) {
        self.sleeps.borrow_mut().push(dur);
    }
}

/// One scripted `recv` response
pub enum Rx {
    Data(usize),
    Code(RxErrorCode),
    Fail,
}

#[derive(Default)]
pub struct StreamLog {
    pub cmds: Vec<StreamCmd>,
    pub script: VecDeque<Rx>,
    pub recv_calls: usize,
    /// Reject the start command
    pub fail_start: bool,
    next_value: f32,
}

pub struct FakeStream {
    log: Rc<RefCell<StreamLog>>,
}

impl RxStream for FakeStream {
    fn issue_stream_cmd(&mut self, cmd: StreamCmd) -> Result<(), DeviceError> {
        let mut log = self.log.borrow_mut();
        log.cmds.push(cmd);
        if log.fail_start && cmd.mode == StreamMode::StartContinuous {
            return Err(DeviceError::Command {
                operation: "issue_stream_cmd",
                message: "start refused".to_owned(),
            });
        }
        Ok(())
    }

    fn recv(
        &mut self,
        buf: &mut [ComplexFloat],
        _timeout: Duration,
    ) -> Result<RecvOutcome, DeviceError> {
        let mut log = self.log.borrow_mut();
        log.recv_calls += 1;
        let next = log.script.pop_front();
        match next {
            Some(Rx::Data(count)) => {
                let count = count.min(buf.len());
                for slot in &mut buf[..count] {
                    *slot = ComplexFloat::new(log.next_value, -log.next_value);
                    log.next_value += 1.0;
                }
                Ok(RecvOutcome::ok(count))
            }
            Some(Rx::Code(code)) => Ok(RecvOutcome::error(code)),
            Some(Rx::Fail) => Err(DeviceError::Stream("transport went away".to_owned())),
            None => Ok(RecvOutcome::error(RxErrorCode::Timeout)),
        }
    }
}

pub struct FakeRadio {
    pub clock_source: ClockSource,
    pub time_source: ClockSource,
    pub master_clock_rate: f64,
    /// Reject clock source selection
    pub fail_clock_source: bool,
    /// Sensor answers, the last one repeats
    pub lock_script: VecDeque<bool>,
    pub sensor_reads: usize,
    /// Last-PPS answers, the last one repeats
    pub pps_script: VecDeque<DeviceTime>,
    pub pps_reads: usize,
    pub now: DeviceTime,
    pub time_set_now: Vec<DeviceTime>,
    pub time_next_pps: Vec<DeviceTime>,
    pub rx_rate: f64,
    pub rx_freq: f64,
    pub rx_gain: f64,
    pub stream_args: Option<StreamArgs>,
    pub stream: Rc<RefCell<StreamLog>>,
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self {
            clock_source: ClockSource::Internal,
            time_source: ClockSource::Internal,
            master_clock_rate: 16e6,
            fail_clock_source: false,
            lock_script: VecDeque::from([false]),
            sensor_reads: 0,
            pps_script: VecDeque::from([DeviceTime::zero()]),
            pps_reads: 0,
            now: DeviceTime::zero(),
            time_set_now: Vec::new(),
            time_next_pps: Vec::new(),
            rx_rate: 1e6,
            rx_freq: 100e6,
            rx_gain: 0.0,
            stream_args: None,
            stream: Rc::default(),
        }
    }
}

impl FakeRadio {
    pub fn with_pps_secs(edges: &[f64]) -> Self {
        Self {
            pps_script: edges.iter().map(|s| DeviceTime::from_secs_f64(*s)).collect(),
            ..Default::default()
        }
    }

    pub fn with_rx(script: Vec<Rx>) -> Self {
        let radio = Self::default();
        radio.stream.borrow_mut().script = script.into();
        radio
    }

    pub fn stream_cmds(&self) -> Vec<StreamCmd> {
        self.stream.borrow().cmds.clone()
    }
}

fn pop_sticky<T: Copy>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().copied()
    }
}

impl Radio for FakeRadio {
    type Stream = FakeStream;

    fn set_clock_source(&mut self, source: ClockSource) -> Result<(), DeviceError> {
        if self.fail_clock_source {
            return Err(DeviceError::Command {
                operation: "set_clock_source",
                message: format!("{source} rejected"),
            });
        }
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
        self.master_clock_rate = hz;
        Ok(())
    }

    fn master_clock_rate(&mut self) -> Result<f64, DeviceError> {
        Ok(self.master_clock_rate)
    }

    fn sensor_bool(&mut self, name: &str) -> Result<bool, DeviceError> {
        if name != crate::device::REF_LOCKED_SENSOR {
            return Err(DeviceError::UnknownSensor(name.to_owned()));
        }
        self.sensor_reads += 1;
        Ok(pop_sticky(&mut self.lock_script).unwrap_or(false))
    }

    fn time_last_pps(&mut self) -> Result<DeviceTime, DeviceError> {
        self.pps_reads += 1;
        Ok(pop_sticky(&mut self.pps_script).unwrap_or_default())
    }

    fn time_now(&mut self) -> Result<DeviceTime, DeviceError> {
        Ok(self.now)
    }

    fn set_time_now(&mut self, time: DeviceTime) -> Result<(), DeviceError> {
        self.time_set_now.push(time);
        self.now = time;
        Ok(())
    }

    fn set_time_next_pps(&mut self, time: DeviceTime) -> Result<(), DeviceError> {
        self.time_next_pps.push(time);
        Ok(())
    }

    fn set_rx_rate(&mut self, hz: f64) -> Result<(), DeviceError> {
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

    fn rx_stream(&mut self, args: &StreamArgs) -> Result<FakeStream, DeviceError> {
        self.stream_args = Some(args.clone());
        Ok(FakeStream {
            log: Rc::clone(&self.stream),
        })
    }
}
