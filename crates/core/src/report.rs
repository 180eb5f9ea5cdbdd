//! Line-oriented progress protocol
//!
//! Written to stdout and consumed by whatever wrapper launched the run:
//!
//! ```text
//! # started 2026-01-01T00:00:00+00:00
//! # points 1048576
//! # steps 10000
//! # dt 5.000000e-04
//! # step wall_seconds sim_time
//! 0.000000e+00 1.234000e-02 5.000000e-04
//! ...
//! # finished 2026-01-01T00:01:40+00:00
//! ```

use crate::error::SimError;
use crate::snapshot::Sci;
use chrono::{DateTime, Utc};
use std::io::Write;

/// Formats header, progress and completion records onto a writer
#[derive(Debug)]
pub struct ProgressReporter<W: Write> {
    out: W,
}

fn io_error(source: std::io::Error) -> SimError {
    SimError::Io { path: None, source }
}

impl<W: Write> ProgressReporter<W> {
    /// Report onto `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Run header followed by the column header line
    ///
    /// # Errors
    /// Returns [`SimError::Io`] if the writer fails
    pub fn header(
        &mut self,
        started: DateTime<Utc>,
        points: usize,
        max_steps: u64,
        dt: f64,
    ) -> Result<(), SimError> {
        writeln!(self.out, "# started {}", started.to_rfc3339()).map_err(io_error)?;
        writeln!(self.out, "# points {points}").map_err(io_error)?;
        writeln!(self.out, "# steps {max_steps}").map_err(io_error)?;
        writeln!(self.out, "# dt {}", Sci(dt)).map_err(io_error)?;
        writeln!(self.out, "# step wall_seconds sim_time").map_err(io_error)?;
        self.out.flush().map_err(io_error)
    }

    /// One progress record
    ///
    /// # Errors
    /// Returns [`SimError::Io`] if the writer fails
    #[expect(
        clippy::cast_precision_loss,
        reason = "Step indices stay far below 2^53"
    )]
    pub fn progress(&mut self, step: u64, wall_seconds: f64, sim_time: f64) -> Result<(), SimError> {
        writeln!(
            self.out,
            "{} {} {}",
            Sci(step as f64),
            Sci(wall_seconds),
            Sci(sim_time)
        )
        .map_err(io_error)?;
        self.out.flush().map_err(io_error)
    }

    /// Trailing completion record
    ///
    /// # Errors
    /// Returns [`SimError::Io`] if the writer fails
    pub fn completion(&mut self, finished: DateTime<Utc>) -> Result<(), SimError> {
        writeln!(self.out, "# finished {}", finished.to_rfc3339()).map_err(io_error)?;
        self.out.flush().map_err(io_error)
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}
