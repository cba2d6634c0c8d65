//! This module is responsible for getting results out of the process:
//! the jitter report table and the raw IQ capture files.

use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use byte_slice_cast::{AsByteSlice, AsMutByteSlice};
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::{
    clock::ClockConfiguration,
    complex::{deinterleave, interleave, ComplexFloat},
    error::Result,
    monitoring::{JitterSample, JitterSink, JitterSummary},
};

// Samples converted to bytes per write
const WRITE_CHUNK: usize = 8192;

/// Local wall time with millisecond precision, as used in the reports
pub fn report_timestamp(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// `pps_jitter_<timestamp>.csv`, with the colons swapped out so the name is
/// valid everywhere
pub fn jitter_report_filename(time: &DateTime<Local>) -> String {
    format!("pps_jitter_{}.csv", report_timestamp(time)).replace(':', "-")
}

/// Jitter report written as a commented CSV table
pub struct CsvJitterReport<W: Write> {
    out: W,
}

impl<W: Write> CsvJitterReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> JitterSink for CsvJitterReport<W> {
    fn begin(&mut self, clock: &ClockConfiguration) -> Result<()> {
        writeln!(self.out, "# PPS Jitter Analysis Report")?;
        writeln!(self.out, "# Timestamp: {}", report_timestamp(&Local::now()))?;
        writeln!(self.out, "# Clock Source: {}", clock.source)?;
        writeln!(self.out, "# Time Source: {}", clock.time_source)?;
        writeln!(
            self.out,
            "# Master Clock: {} MHz",
            clock.master_clock_rate_hz / 1e6
        )?;
        writeln!(self.out, "Sample,Timestamp,Deviation(ns),PPS_Time")?;
        Ok(())
    }

    fn record(&mut self, sample: &JitterSample) -> Result<()> {
        writeln!(
            self.out,
            "{},{},{},{}",
            sample.index,
            report_timestamp(&sample.wall_timestamp),
            sample.deviation_ns,
            sample.pps_time
        )?;
        Ok(())
    }

    fn finish(&mut self, summary: &JitterSummary) -> Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "# Summary")?;
        writeln!(self.out, "# Average,{}", summary.average_ns)?;
        writeln!(self.out, "# Peak-to-Peak,{}", summary.peak_to_peak_ns)?;
        writeln!(self.out, "# Max Advance,{}", summary.max_advance_ns)?;
        writeln!(self.out, "# Max Delay,{}", summary.max_delay_ns)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Jitter report on disk. The file is deleted on drop unless [`keep`] was
/// called, so a run that fails part way leaves no report behind.
///
/// [`keep`]: JitterReportFile::keep
pub struct JitterReportFile {
    path: PathBuf,
    report: CsvJitterReport<BufWriter<File>>,
    kept: bool,
}

impl JitterReportFile {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let report = CsvJitterReport::new(BufWriter::new(File::create(&path)?));
        Ok(Self {
            path,
            report,
            kept: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and keep the file
    pub fn keep(mut self) -> Result<PathBuf> {
        self.report.out.flush()?;
        self.kept = true;
        Ok(self.path.clone())
    }
}

impl JitterSink for JitterReportFile {
    fn begin(&mut self, clock: &ClockConfiguration) -> Result<()> {
        self.report.begin(clock)
    }

    fn record(&mut self, sample: &JitterSample) -> Result<()> {
        self.report.record(sample)
    }

    fn finish(&mut self, summary: &JitterSummary) -> Result<()> {
        self.report.finish(summary)
    }
}

impl Drop for JitterReportFile {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed unfinished jitter report"),
            Err(e) => warn!(path = %self.path.display(), "Failed to remove unfinished jitter report: {e}"),
        }
    }
}

/// Dump samples as interleaved native-endian `f32`, no header. Returns the
/// number of bytes written.
pub fn write_iq<W: Write>(mut out: W, samples: &[ComplexFloat]) -> Result<u64> {
    let mut flat = Vec::with_capacity(WRITE_CHUNK * 2);
    let mut written = 0u64;
    for chunk in samples.chunks(WRITE_CHUNK) {
        interleave(chunk, &mut flat);
        let bytes = flat.as_byte_slice();
        out.write_all(bytes)?;
        written += bytes.len() as u64;
    }
    out.flush()?;
    Ok(written)
}

/// Write a capture file at `path`
pub fn save_capture(path: impl AsRef<Path>, samples: &[ComplexFloat]) -> Result<u64> {
    let path = path.as_ref();
    let bytes = write_iq(BufWriter::new(File::create(path)?), samples)?;
    info!(path = %path.display(), samples = samples.len(), bytes, "Capture saved");
    Ok(bytes)
}

/// Read a raw capture back. A trailing partial sample is ignored.
pub fn read_iq<R: Read>(mut input: R) -> Result<Vec<ComplexFloat>> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    // Whole samples only, two floats each
    let mut flat = vec![0f32; bytes.len() / 8 * 2];
    let raw = flat.as_mut_byte_slice();
    let whole = raw.len();
    raw.copy_from_slice(&bytes[..whole]);
    Ok(deinterleave(&flat))
}
