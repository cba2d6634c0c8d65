//! Error types for the synchronization and acquisition core

use std::io;

use thiserror::Error;

use crate::device::DeviceTime;

/// Failures raised by the radio front-end itself.
///
/// These are session-level problems (the driver could not do what it was
/// asked), as opposed to the per-receive [`RxErrorCode`](crate::device::RxErrorCode)
/// which the acquisition loop classifies locally.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The session could not be created
    #[error("failed to open radio session: {0}")]
    Open(String),

    /// A setter or getter was rejected by the driver
    #[error("{operation} failed: {message}")]
    Command {
        /// Name of the driver call
        operation: &'static str,
        /// Driver-provided reason
        message: String,
    },

    /// The requested sensor does not exist on this motherboard
    #[error("sensor not found: {0}")]
    UnknownSensor(String),

    /// The streamer could not be created or has gone away
    #[error("rx streamer: {0}")]
    Stream(String),
}

/// Fatal errors of a workflow run
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The PPS reference never ticked while polling
    #[error("no PPS edge after {attempts} polls")]
    NoPpsEdge { attempts: u32 },

    /// The time latched at the trigger edge is not the one scheduled
    #[error("trigger edge latched {observed} instead of {expected}")]
    TriggerMisaligned {
        expected: DeviceTime,
        observed: DeviceTime,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
