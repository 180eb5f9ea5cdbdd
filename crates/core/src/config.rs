//! Run configuration
//!
//! Host-side scalars fixed before the loop starts: ensemble size, step count,
//! snapshot cadence, time step and plot boundary. Immutable once a
//! [`Simulation`](crate::Simulation) has been built from them.

use crate::error::SimError;
use crate::snapshot::SNAPSHOT_TIME_RESOLUTION;
use serde::{Deserialize, Serialize};

/// How point positions are laid out on the plot disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Polar sweep: equal radial increments, a full turn of equal angular increments at each radius
    Polar,
    /// Area-uniform random positions from a fixed seed
    SeededUniform {
        /// RNG seed
        seed: u64,
    },
}

/// How often device errors are checked
///
/// `PerOperation` wraps every device call in an error scope and blocks until it completes,
/// giving exact diagnostics. `Deferred` only inspects errors at synchronization points,
/// trading diagnostic precision for throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCheckMode {
    /// Check after every device operation
    PerOperation,
    /// Check at device→host synchronization points only
    Deferred,
}

impl Default for ErrorCheckMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::PerOperation
        } else {
            Self::Deferred
        }
    }
}

/// Execution backend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendChoice {
    /// GPU when the field function has a device kernel, host otherwise
    #[default]
    Auto,
    /// Require the GPU backend
    Gpu,
    /// Rayon thread pool on the host
    Host,
}

/// Host-side run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of sample points (N)
    pub points: usize,
    /// Total number of steps
    pub max_steps: u64,
    /// Steps between snapshots (step 0 always emits)
    pub snapshot_cadence: u64,
    /// Fixed time step Δt in seconds
    pub dt: f64,
    /// Plot boundary radius R
    pub limit: f32,
    /// Position layout
    pub placement: Placement,
    /// Device error checking discipline
    pub check_mode: ErrorCheckMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            points: 1 << 20,
            max_steps: 10_000,
            snapshot_cadence: 100,
            dt: 0.0005,
            limit: 10.0,
            placement: Placement::Polar,
            check_mode: ErrorCheckMode::default(),
        }
    }
}

impl RunConfig {
    /// Reject configurations the loop cannot run
    ///
    /// # Errors
    /// Returns [`SimError::InvalidConfig`] naming the offending field
    pub fn validate(&self) -> Result<(), SimError> {
        if self.points == 0 {
            return Err(SimError::InvalidConfig("points must be positive".into()));
        }
        if u32::try_from(self.points).is_err() {
            return Err(SimError::InvalidConfig(format!(
                "points must fit in 32 bits, got {}",
                self.points
            )));
        }
        if self.snapshot_cadence == 0 {
            return Err(SimError::InvalidConfig(
                "snapshot cadence must be positive".into(),
            ));
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "dt must be finite and positive, got {}",
                self.dt
            )));
        }
        if self.expected_snapshots() > 1
            && self.dt * (self.snapshot_cadence as f64) < SNAPSHOT_TIME_RESOLUTION
        {
            return Err(SimError::InvalidConfig(format!(
                "dt * cadence ({} * {}) is below the snapshot time resolution {SNAPSHOT_TIME_RESOLUTION}; \
                 snapshot file names would collide",
                self.dt, self.snapshot_cadence
            )));
        }
        if !self.limit.is_finite() || self.limit <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "limit must be finite and positive, got {}",
                self.limit
            )));
        }
        Ok(())
    }

    /// Number of snapshots a full run emits: `ceil(max_steps / cadence)`
    #[must_use]
    pub fn expected_snapshots(&self) -> u64 {
        self.max_steps.div_ceil(self.snapshot_cadence.max(1))
    }

    /// Whether `step` is a snapshot step
    #[must_use]
    pub fn is_snapshot_step(&self, step: u64) -> bool {
        step % self.snapshot_cadence.max(1) == 0
    }
}
