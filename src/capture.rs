//! This module contains all the capture logic

// Once the trigger edge has passed, the capture does one thing, as fast as
// possible: drain the streamer into a preallocated buffer until it is full.
// Overflows are tolerated, any other receive error ends the capture early and
// keeps what we have. The stream is always stopped on the way out.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    complex::ComplexFloat,
    device::{DeviceTime, Radio, RxErrorCode, RxStream, StreamCmd},
    error::{DeviceError, Error, Result},
};

/// Fixed-capacity sample storage with a write cursor.
///
/// Storage is allocated up front; samples are only ever appended and the
/// cursor never passes the capacity.
pub struct AcquisitionBuffer {
    storage: Box<[ComplexFloat]>,
    cursor: usize,
}

impl AcquisitionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![ComplexFloat::default(); capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of samples written so far
    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    pub fn is_full(&self) -> bool {
        self.cursor == self.capacity()
    }

    /// Append as much of `chunk` as fits, returning how many samples were taken
    pub fn push(&mut self, chunk: &[ComplexFloat]) -> usize {
        let n = chunk.len().min(self.remaining());
        self.storage[self.cursor..self.cursor + n].copy_from_slice(&chunk[..n]);
        self.cursor += n;
        n
    }

    /// The written part of the buffer
    pub fn samples(&self) -> &[ComplexFloat] {
        &self.storage[..self.cursor]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureMetadata {
    pub start_time: DeviceTime,
    pub end_time: DeviceTime,
    pub sample_rate: f64,
    pub center_freq: f64,
    pub gain: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Complete,
    /// The receive loop was aborted by `code`
    Truncated { code: RxErrorCode },
}

pub struct Capture {
    pub buffer: AcquisitionBuffer,
    pub metadata: CaptureMetadata,
    pub outcome: CaptureOutcome,
    pub overflows: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Streaming,
    Draining,
    Error,
    Stopped,
}

/// Keeps a started stream paired with exactly one stop command
struct StreamGuard<'a, T: RxStream> {
    stream: &'a mut T,
    state: AcquisitionState,
}

impl<'a, T: RxStream> StreamGuard<'a, T> {
    /// Issue the start command. If that fails the guard is already live, so
    /// the stop still goes out.
    fn start(stream: &'a mut T) -> std::result::Result<Self, DeviceError> {
        let mut guard = Self {
            stream,
            state: AcquisitionState::Idle,
        };
        guard.transition(AcquisitionState::Streaming);
        guard.stream.issue_stream_cmd(StreamCmd::start_continuous_now())?;
        Ok(guard)
    }

    fn transition(&mut self, to: AcquisitionState) {
        debug!(from = ?self.state, ?to, "Acquisition state");
        self.state = to;
    }

    fn stop(&mut self) -> std::result::Result<(), DeviceError> {
        if self.state == AcquisitionState::Stopped {
            return Ok(());
        }
        self.transition(AcquisitionState::Stopped);
        self.stream.issue_stream_cmd(StreamCmd::stop_continuous())
    }
}

impl<T: RxStream> Drop for StreamGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop rx stream: {e}");
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionOptions {
    /// Samples requested per `recv`
    pub chunk_capacity: usize,
    pub recv_timeout: Duration,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            chunk_capacity: 32768,
            recv_timeout: Duration::from_secs(1),
        }
    }
}

pub struct StreamAcquisitionEngine {
    options: AcquisitionOptions,
}

impl StreamAcquisitionEngine {
    pub fn new(options: AcquisitionOptions) -> Self {
        Self { options }
    }

    /// Start streaming now and fill a buffer of `num_samples`.
    ///
    /// A receive error other than overflow ends the capture with whatever was
    /// received so far ([`CaptureOutcome::Truncated`]). Driver failures are
    /// returned as errors; the stream is stopped in every case.
    pub fn acquire<R: Radio>(
        &self,
        radio: &mut R,
        stream: &mut R::Stream,
        num_samples: usize,
    ) -> Result<Capture> {
        if num_samples == 0 || self.options.chunk_capacity == 0 {
            return Err(Error::InvalidConfig(
                "capture and chunk sizes must be non-zero".to_owned(),
            ));
        }
        let sample_rate = radio.rx_rate()?;
        let center_freq = radio.rx_freq()?;
        let gain = radio.rx_gain()?;

        let mut buffer = AcquisitionBuffer::new(num_samples);
        let mut chunk = vec![ComplexFloat::default(); self.options.chunk_capacity];
        let mut overflows = 0usize;
        let mut outcome = CaptureOutcome::Complete;

        let mut guard = StreamGuard::start(stream)?;
        let start_time = radio.time_now()?;
        info!(%start_time, num_samples, "Streaming started");

        while !buffer.is_full() {
            let rx = guard.stream.recv(&mut chunk, self.options.recv_timeout)?;
            match rx.error_code {
                RxErrorCode::None => {
                    buffer.push(&chunk[..rx.count.min(chunk.len())]);
                }
                RxErrorCode::Overflow => {
                    overflows += 1;
                    warn!(overflows, "Overflow, continuing");
                }
                code => {
                    error!(written = buffer.len(), "Receive error: {code}");
                    guard.transition(AcquisitionState::Error);
                    outcome = CaptureOutcome::Truncated { code };
                    break;
                }
            }
        }
        if outcome == CaptureOutcome::Complete {
            guard.transition(AcquisitionState::Draining);
        }
        guard.stop()?;
        drop(guard);

        let end_time = radio.time_now()?;
        info!(
            %end_time,
            written = buffer.len(),
            overflows,
            "Streaming stopped"
        );
        Ok(Capture {
            buffer,
            metadata: CaptureMetadata {
                start_time,
                end_time,
                sample_rate,
                center_freq,
                gain,
            },
            outcome,
            overflows,
        })
    }
}
