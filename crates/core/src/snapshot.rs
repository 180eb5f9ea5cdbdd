//! Snapshot files and the run manifest
//!
//! One `.dat` file per emitted snapshot, named after the simulation time:
//!
//! ```text
//! # limit 1.000000e+01
//! # x y field
//! 0.000000e+00 0.000000e+00 5.000000e-04
//! ...
//! ```
//!
//! Data lines follow ensemble index order. Downstream plotting depends on both the
//! order and the column layout.

use crate::config::RunConfig;
use crate::device::DeviceCandidate;
use crate::ensemble::SamplePoint;
use crate::error::SimError;
use crate::kernel::FieldParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the manifest written next to the snapshots
pub const MANIFEST_FILE: &str = "run.json";

/// Extension of snapshot files
pub const SNAPSHOT_EXTENSION: &str = "dat";

/// Scientific notation with six fractional digits and a signed two-digit exponent
///
/// `Sci(0.0005)` displays as `5.000000e-04`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sci(pub f64);

impl fmt::Display for Sci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = format!("{:.6e}", self.0);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) => {
                let (sign, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exponent),
                };
                write!(f, "{mantissa}e{sign}{digits:0>2}")
            }
            // inf / NaN
            None => f.write_str(&formatted),
        }
    }
}

/// Smallest time difference [`snapshot_file_name`] can tell apart
pub const SNAPSHOT_TIME_RESOLUTION: f64 = 1e-6;

/// File name for the snapshot taken at simulation time `time`
#[must_use]
pub fn snapshot_file_name(time: f64) -> String {
    format!("{time:.6}.{SNAPSHOT_EXTENSION}")
}

/// A fully synchronized host-side view of the ensemble
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    /// Step index that produced this state
    pub step: u64,
    /// Simulation time of the state
    pub time: f64,
    /// Plot boundary radius
    pub limit: f32,
    /// Ensemble in index order
    pub points: &'a [SamplePoint],
}

/// Consumer of snapshots
pub trait SnapshotEmitter {
    /// Called once before the first snapshot
    ///
    /// # Errors
    /// I/O failures persisting the manifest
    fn begin(&mut self, _manifest: &RunManifest) -> Result<(), SimError> {
        Ok(())
    }

    /// Persist one snapshot
    ///
    /// # Errors
    /// I/O failures; these abort the run
    fn emit(&mut self, snapshot: &Snapshot<'_>) -> Result<(), SimError>;
}

/// Emitter used when no output directory is given
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardEmitter;

impl SnapshotEmitter for DiscardEmitter {
    fn emit(&mut self, _snapshot: &Snapshot<'_>) -> Result<(), SimError> {
        Ok(())
    }
}

/// Writes one file per snapshot into a directory
#[derive(Debug)]
pub struct DirectoryEmitter {
    dir: PathBuf,
    written: usize,
}

impl DirectoryEmitter {
    /// Use `dir`, creating it if needed
    ///
    /// # Errors
    /// Returns [`SimError::Io`] if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SimError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SimError::io_at(&dir, e))?;
        Ok(Self { dir, written: 0 })
    }

    /// Output directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of snapshot files written so far
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl SnapshotEmitter for DirectoryEmitter {
    fn begin(&mut self, manifest: &RunManifest) -> Result<(), SimError> {
        manifest.save(&self.dir).map(|_| ())
    }

    fn emit(&mut self, snapshot: &Snapshot<'_>) -> Result<(), SimError> {
        let path = self.dir.join(snapshot_file_name(snapshot.time));
        write_snapshot(&path, snapshot)?;
        self.written += 1;
        debug!("Wrote snapshot {} ({} points)", path.display(), snapshot.points.len());
        Ok(())
    }
}

/// Write `snapshot` to `path` in the snapshot file format
///
/// # Errors
/// Returns [`SimError::Io`] naming `path` on any create or write failure, including
/// when `path` already exists. Snapshot files are never overwritten.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot<'_>) -> Result<(), SimError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| SimError::io_at(path, e))?;
    let mut out = BufWriter::new(file);
    write_lines(&mut out, snapshot)
        .and_then(|()| out.flush())
        .map_err(|e| SimError::io_at(path, e))
}

fn write_lines(out: &mut impl Write, snapshot: &Snapshot<'_>) -> std::io::Result<()> {
    writeln!(out, "# limit {}", Sci(f64::from(snapshot.limit)))?;
    writeln!(out, "# x y field")?;
    for point in snapshot.points {
        writeln!(
            out,
            "{} {} {}",
            Sci(f64::from(point.x)),
            Sci(f64::from(point.y)),
            Sci(f64::from(point.field))
        )?;
    }
    Ok(())
}

/// Parse a snapshot file back into its limit and points
///
/// # Errors
/// - [`SimError::Io`] if the file cannot be read
/// - [`SimError::Parse`] for a missing limit header or a malformed data line
pub fn read_snapshot(path: &Path) -> Result<(f32, Vec<SamplePoint>), SimError> {
    let contents = fs::read_to_string(path).map_err(|e| SimError::io_at(path, e))?;
    let parse_error = |line: usize, message: String| SimError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut limit = None;
    let mut points = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(value) = comment.trim().strip_prefix("limit") {
                let value = value.trim().parse::<f32>().map_err(|e| {
                    parse_error(line_number, format!("bad limit '{}': {e}", value.trim()))
                })?;
                limit = Some(value);
            }
            continue;
        }

        let mut fields = line.split_whitespace().map(str::parse::<f32>);
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(Ok(x)), Some(Ok(y)), Some(Ok(field)), None) => {
                points.push(SamplePoint { x, y, field });
            }
            _ => {
                return Err(parse_error(
                    line_number,
                    format!("expected three numbers, got '{line}'"),
                ))
            }
        }
    }

    let limit = limit.ok_or_else(|| parse_error(1, "missing '# limit' header".into()))?;
    Ok((limit, points))
}

/// Metadata describing one run, written once as `run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Wall-clock start of the run
    pub started: DateTime<Utc>,
    /// Name of the field function
    pub kernel: String,
    /// Device the run executes on
    pub device: DeviceCandidate,
    /// Host-side configuration
    pub config: RunConfig,
    /// Device parameter set
    pub params: FieldParams,
    /// Snapshots a complete run will emit
    pub expected_snapshots: u64,
}

impl RunManifest {
    /// Save as `run.json` inside `dir`, returning the file path
    ///
    /// # Errors
    /// Returns [`SimError::Io`] if the manifest cannot be serialized or written
    pub fn save(&self, dir: &Path) -> Result<PathBuf, SimError> {
        let path = dir.join(MANIFEST_FILE);
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SimError::io_at(&path, std::io::Error::from(e)))?;
        fs::write(&path, contents).map_err(|e| SimError::io_at(&path, e))?;
        Ok(path)
    }

    /// Load a manifest from `path`
    ///
    /// # Errors
    /// [`SimError::Io`] if unreadable, [`SimError::Parse`] if not a valid manifest
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let contents = fs::read_to_string(path).map_err(|e| SimError::io_at(path, e))?;
        serde_json::from_str(&contents).map_err(|e| SimError::Parse {
            path: path.to_path_buf(),
            line: e.line(),
            message: e.to_string(),
        })
    }
}
