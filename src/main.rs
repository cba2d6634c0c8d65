use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use pps_slurper::{
    align::align_captures,
    capture::{AcquisitionOptions, CaptureOutcome},
    device::DeviceTime,
    exfil::{jitter_report_filename, save_capture, JitterReportFile},
    poll::ThreadSleeper,
    sim::SimulatedRadio,
    workflow::{measure_jitter, tdoa_capture, CaptureOptions, JitterOptions},
    Result,
};
use tracing::warn;

mod args;

use args::{convert_filter, AlignArgs, Args, CaptureArgs, Command, JitterArgs};

fn run_jitter(args: JitterArgs) -> Result<()> {
    let mut radio = SimulatedRadio::new(args.sim.options())?;
    let options = JitterOptions {
        clock: args.reference.options(Some(args.master_clock_rate)),
        num_samples: args.samples as usize,
        ..Default::default()
    };
    let path = args
        .output
        .unwrap_or_else(|| jitter_report_filename(&Local::now()).into());
    let mut report = JitterReportFile::create(path)?;

    // An error drops the report, which deletes the partial file
    let (clock, summary) = measure_jitter(&mut radio, &options, &mut report, &ThreadSleeper)?;
    let path = report.keep()?;

    println!("Clock source: {}, time source: {}", clock.source, clock.time_source);
    println!("Average period error: {} ns", summary.average_ns);
    println!("Peak-to-peak jitter: {} ns", summary.peak_to_peak_ns);
    println!("Max advance: {} ns", summary.max_advance_ns);
    println!("Max delay: {} ns", summary.max_delay_ns);
    println!("Report saved to {}", path.display());
    Ok(())
}

fn run_capture(args: CaptureArgs) -> Result<()> {
    let mut radio = SimulatedRadio::new(args.sim.options())?;
    let options = CaptureOptions {
        clock: args.reference.options(args.master_clock_rate),
        sample_rate: args.rate,
        center_freq: args.freq,
        gain: args.gain,
        duration: args.duration,
        trigger_at: DeviceTime::from_secs_f64(args.trigger_at),
        acquisition: AcquisitionOptions {
            chunk_capacity: args.chunk as usize,
            ..Default::default()
        },
        ..Default::default()
    };

    let run = tdoa_capture(&mut radio, &options, &ThreadSleeper)?;
    let capture = &run.capture;
    if let CaptureOutcome::Truncated { code } = capture.outcome {
        warn!(
            written = capture.buffer.len(),
            requested = capture.buffer.capacity(),
            "Capture cut short: {code}"
        );
    }
    save_capture(&args.output, capture.buffer.samples())?;

    let start = capture.metadata.start_time;
    println!("Trigger edge: {}", run.trigger.edge_time);
    println!(
        "Capture start: {} s {} ns",
        start.full_secs(),
        (start.frac_secs() * 1e9).round() as u64
    );
    println!("Capture end: {}", capture.metadata.end_time);
    println!(
        "Saved {} of {} samples to {}",
        capture.buffer.len(),
        capture.buffer.capacity(),
        args.output.display()
    );
    Ok(())
}

fn run_align(args: AlignArgs) -> Result<()> {
    for path in align_captures(&args.inputs, &args.output_dir, args.rate)? {
        println!("Aligned {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let result = match args.command {
        Command::Jitter(a) => run_jitter(a),
        Command::Capture(a) => run_capture(a),
        Command::Align(a) => run_align(a),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
