//! Wave-Packet Ensemble Engine
//!
//! Evolves a field sampled at a large ensemble of 2-D points in fixed time steps on a
//! data-parallel accelerator, periodically pulling the ensemble back to the host
//! and exporting snapshots.
//!
//! ## Pipeline
//!
//! - Device selection ranks adapters by capability score
//! - The point ensemble lives on the host and on the device, tracked by generation
//! - Each step advances the clock once, then runs the field kernel over every point
//! - Snapshot steps synchronize device→host and hand the fresh copy to an emitter
//!
//! The field itself is pluggable through [`FieldFunction`]; [`WavePacket`] is the
//! dispersive wave-packet envelope, [`ElapsedTime`] a trivial clock probe.

// Errors and configuration
pub mod config;
pub mod error;

// Ensemble storage and device selection
pub mod device;
pub mod ensemble;

// Kernels and execution
pub mod backend;
pub mod clock;
pub mod kernel;

// Orchestration and output
pub mod report;
pub mod simulation;
pub mod snapshot;

pub use backend::{create_backend, EnsembleBackend, HostBackend};
pub use clock::SimulationClock;
pub use config::{BackendChoice, ErrorCheckMode, Placement, RunConfig};
pub use device::{select_best, DeviceCandidate, DeviceKind};
pub use ensemble::{EnsembleMirror, SamplePoint};
pub use error::SimError;
pub use kernel::{ElapsedTime, FieldFunction, FieldParams, WavePacket, WavePacketInputs};
pub use report::ProgressReporter;
pub use simulation::{RunState, RunSummary, Simulation, SimulationContext};
pub use snapshot::{
    read_snapshot, DirectoryEmitter, DiscardEmitter, RunManifest, Snapshot, SnapshotEmitter,
};

#[cfg(feature = "gpu")]
pub use backend::GpuBackend;
#[cfg(feature = "gpu")]
pub use device::GpuContext;
