//! PPS-disciplined timing measurement and triggered IQ capture for
//! software-defined radios.
//!
//! The core negotiates the reference clock ([`clock`]), aligns to PPS edges
//! ([`pps`]), and then either measures the jitter of the reference
//! ([`monitoring`]) or streams a time-aligned capture ([`capture`]). The
//! radio itself is anything implementing [`device::Radio`].

pub mod align;
pub mod capture;
pub mod clock;
pub mod complex;
pub mod device;
pub mod error;
pub mod exfil;
pub mod monitoring;
pub mod poll;
pub mod pps;
pub mod sim;
pub mod workflow;

#[cfg(test)]
mod fake;

pub use error::{DeviceError, Error, Result};
