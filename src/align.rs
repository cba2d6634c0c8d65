//! Cropping a set of captures so they all start at the same instant.
//!
//! Each receiver starts streaming at a slightly different device time. The
//! latest start becomes the common origin and every earlier capture loses the
//! samples it recorded before that.

use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    exfil::{read_iq, write_iq},
};

/// A capture file and the device time its first sample was taken at
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureFile {
    pub path: PathBuf,
    pub start_time: f64,
}

/// Samples to drop from the front of each capture, in input order
pub fn crop_offsets(start_times: &[f64], sample_rate: f64) -> Vec<usize> {
    let latest = start_times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    start_times
        .iter()
        .map(|t| ((latest - t) * sample_rate).round() as usize)
        .collect()
}

/// Crop every capture in `files` and write it under the same file name in
/// `out_dir`. Returns the written paths. Inputs sharing a file name are
/// rejected before anything is written.
pub fn align_captures(files: &[CaptureFile], out_dir: &Path, sample_rate: f64) -> Result<Vec<PathBuf>> {
    if files.is_empty() {
        return Err(Error::InvalidConfig("no capture files to align".to_owned()));
    }
    if sample_rate <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "sample rate must be positive, got {sample_rate}"
        )));
    }
    let mut names = HashSet::with_capacity(files.len());
    let mut out_paths = Vec::with_capacity(files.len());
    for file in files {
        let name = file.path.file_name().ok_or_else(|| {
            Error::InvalidConfig(format!("{} is not a file", file.path.display()))
        })?;
        if !names.insert(name) {
            return Err(Error::InvalidConfig(format!(
                "more than one input is named {}",
                Path::new(name).display()
            )));
        }
        out_paths.push(out_dir.join(name));
    }
    fs::create_dir_all(out_dir)?;

    let starts: Vec<f64> = files.iter().map(|f| f.start_time).collect();
    let offsets = crop_offsets(&starts, sample_rate);

    let mut written = Vec::with_capacity(files.len());
    for ((file, offset), out_path) in files.iter().zip(offsets).zip(out_paths) {
        let samples = read_iq(BufReader::new(File::open(&file.path)?))?;
        if offset > samples.len() {
            warn!(
                path = %file.path.display(),
                offset,
                len = samples.len(),
                "Capture ends before the common start time"
            );
        }
        let kept = &samples[offset.min(samples.len())..];
        write_iq(BufWriter::new(File::create(&out_path)?), kept)?;
        info!(
            input = %file.path.display(),
            output = %out_path.display(),
            cropped = offset,
            "Aligned capture"
        );
        written.push(out_path);
    }
    Ok(written)
}
