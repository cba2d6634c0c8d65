//! Argument parsing for running from the command line

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use pps_slurper::{
    align::CaptureFile,
    clock::ClockOptions,
    device::ClockSource,
    poll::PollPolicy,
    sim::SimOptions,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Measure the period jitter of the PPS reference against the device clock
    Jitter(JitterArgs),
    /// Take a PPS-triggered IQ capture for TDOA
    Capture(CaptureArgs),
    /// Crop captures so they all begin at the latest start time
    Align(AlignArgs),
}

#[derive(clap::Args, Debug)]
pub struct JitterArgs {
    /// Number of PPS periods to measure
    #[clap(short = 'n', long, default_value_t = 100)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub samples: u64,
    /// Master clock rate in Hz
    #[clap(long, default_value_t = 32e6)]
    pub master_clock_rate: f64,
    /// Report path, timestamped in the working directory by default
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    #[clap(flatten)]
    pub reference: ReferenceArgs,
    #[clap(flatten)]
    pub sim: SimArgs,
}

#[derive(clap::Args, Debug)]
pub struct CaptureArgs {
    /// Centre frequency in Hz
    #[clap(short, long, default_value_t = 2.4e9)]
    pub freq: f64,
    /// Sample rate in samples per second
    #[clap(short, long, default_value_t = 15e6)]
    pub rate: f64,
    /// Receive gain in dB
    #[clap(short, long, default_value_t = 40.0)]
    pub gain: f64,
    /// Capture length in seconds
    #[clap(short, long, default_value_t = 0.005)]
    pub duration: f64,
    /// Device time, in seconds, latched on the trigger PPS edge
    #[clap(long, default_value_t = 9.0)]
    pub trigger_at: f64,
    /// Samples per receive call
    #[clap(long, default_value_t = 32768)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk: u64,
    /// Master clock rate in Hz, driver default if unset
    #[clap(long)]
    pub master_clock_rate: Option<f64>,
    /// Raw fc32 output file
    #[clap(short, long, default_value = "signal1.bin")]
    pub output: PathBuf,
    #[clap(flatten)]
    pub reference: ReferenceArgs,
    #[clap(flatten)]
    pub sim: SimArgs,
}

#[derive(clap::Args, Debug)]
pub struct AlignArgs {
    /// Sample rate the captures were taken at
    #[clap(short, long)]
    pub rate: f64,
    /// Directory for the cropped captures
    #[clap(short, long, default_value = "aligned_iq")]
    pub output_dir: PathBuf,
    /// Captures as PATH@START_SECONDS
    #[clap(required = true, value_parser = capture_file)]
    pub inputs: Vec<CaptureFile>,
}

#[derive(clap::Args, Debug)]
pub struct ReferenceArgs {
    /// Requested clock and time source (external or internal)
    #[clap(long, default_value = "external", value_parser = clock_source)]
    pub clock_source: ClockSource,
    /// Reference lock checks, one second apart
    #[clap(long, default_value_t = 10)]
    #[clap(value_parser = clap::value_parser!(u32).range(1..))]
    pub lock_attempts: u32,
}

impl ReferenceArgs {
    pub fn options(&self, master_clock_rate_hz: Option<f64>) -> ClockOptions {
        ClockOptions {
            requested: self.clock_source,
            master_clock_rate_hz,
            lock_poll: PollPolicy::new(Duration::from_secs(1), self.lock_attempts),
        }
    }
}

/// Behaviour of the simulated front-end
#[derive(clap::Args, Debug)]
pub struct SimArgs {
    /// Error added to every PPS period, in nanoseconds
    #[clap(long, default_value_t = 0, allow_hyphen_values = true)]
    pub sim_pps_offset_ns: i64,
    /// Failed lock checks before the external reference locks
    #[clap(long, default_value_t = 2)]
    pub sim_lock_after: u32,
    /// Never lock the external reference
    #[clap(long)]
    pub sim_no_lock: bool,
}

impl SimArgs {
    pub fn options(&self) -> SimOptions {
        SimOptions {
            pps_offset_ns: self.sim_pps_offset_ns,
            lock_after: (!self.sim_no_lock).then_some(self.sim_lock_after),
            ..Default::default()
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn clock_source(s: &str) -> Result<ClockSource, String> {
    s.parse()
}

fn capture_file(s: &str) -> Result<CaptureFile, String> {
    let (path, start) = s
        .rsplit_once('@')
        .ok_or_else(|| format!("expected PATH@START_SECONDS, got '{s}'"))?;
    let start_time = start
        .parse::<f64>()
        .map_err(|_| format!("invalid start time '{start}'"))?;
    Ok(CaptureFile {
        path: PathBuf::from(path),
        start_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_file_parsing() {
        let f = capture_file("runs/usrp@1/signal1.bin@0.040741857142857").unwrap();
        assert_eq!(f.path, PathBuf::from("runs/usrp@1/signal1.bin"));
        assert_eq!(f.start_time, 0.040741857142857);
        assert!(capture_file("signal1.bin").is_err());
        assert!(capture_file("signal1.bin@soon").is_err());
    }

    #[test]
    fn test_capture_defaults() {
        let args = Args::parse_from(["pps_slurper", "capture"]);
        match args.command {
            Command::Capture(c) => {
                assert_eq!(c.rate, 15e6);
                assert_eq!(c.trigger_at, 9.0);
                assert_eq!(c.reference.clock_source, ClockSource::External);
                assert_eq!(c.sim.options().lock_after, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_negative_pps_offset() {
        let args = Args::parse_from(["pps_slurper", "jitter", "--sim-pps-offset-ns", "-250", "--sim-no-lock"]);
        match args.command {
            Command::Jitter(j) => {
                let sim = j.sim.options();
                assert_eq!(sim.pps_offset_ns, -250);
                assert_eq!(sim.lock_after, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
