//! Simulation clock
//!
//! One scalar of elapsed simulation time, advanced by the orchestrator exactly once
//! per step. Kernel invocations never touch it; they receive the value it returns
//! from [`SimulationClock::advance`] as an immutable input.
//!
//! The clock stores the completed step count rather than a running sum so that
//! after `s` steps it reads `s · Δt` without accumulated rounding.

use serde::{Deserialize, Serialize};

/// Elapsed simulation time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    dt: f64,
    steps: u64,
}

impl SimulationClock {
    /// Create a clock at `t = 0` with time step `dt`
    #[must_use]
    pub fn new(dt: f64) -> Self {
        Self { dt, steps: 0 }
    }

    /// Advance by one Δt and return the new elapsed time
    pub fn advance(&mut self) -> f64 {
        self.steps += 1;
        self.elapsed()
    }

    /// Elapsed simulation time in seconds
    #[must_use]
    pub fn elapsed(&self) -> f64 {
        self.steps as f64 * self.dt
    }

    /// Number of completed advances
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Time step in seconds
    #[must_use]
    pub fn dt(&self) -> f64 {
        self.dt
    }
}
