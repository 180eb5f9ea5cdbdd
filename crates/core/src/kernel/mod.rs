//! Field kernels
//!
//! A field kernel is a pure function of `(position, time, parameters)`. It is
//! evaluated once per point per step, and no point ever reads another point's value.
//! The host backend calls [`FieldFunction::evaluate`] from a rayon pool. The GPU
//! backend splices [`FieldFunction::wgsl`] into the compute shader template, so a
//! function that supplies no WGSL can only run on the host.
//!
//! # WGSL contract
//!
//! The snippet must define
//!
//! ```wgsl
//! fn field_value(pos: vec2<f32>, t: f32) -> f32
//! ```
//!
//! and may read the `params: FieldParams` uniform declared by the template.

mod elapsed;
mod wave_packet;

pub use elapsed::ElapsedTime;
pub use wave_packet::{WavePacket, WavePacketInputs};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "gpu")]
use bytemuck::{Pod, Zeroable};

/// Device parameter set: read-only constants pushed to the device before the loop
///
/// Must match the `FieldParams` uniform layout in the shader template (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "gpu", derive(Pod, Zeroable))]
pub struct FieldParams {
    /// Amplitude A
    pub amplitude: f32,
    /// Central wavenumber k (rad/m)
    pub wavenumber: f32,
    /// Angular frequency ω at k (rad/s)
    pub frequency: f32,
    /// Group velocity dω/dk (m/s)
    pub group_velocity: f32,
    /// Packet width in wavenumber space, dk (rad/m)
    pub packet_width: f32,
    #[serde(skip)]
    _padding: [f32; 3],
}

impl FieldParams {
    /// Assemble a parameter set from already-derived constants
    #[must_use]
    pub fn new(
        amplitude: f32,
        wavenumber: f32,
        frequency: f32,
        group_velocity: f32,
        packet_width: f32,
    ) -> Self {
        Self {
            amplitude,
            wavenumber,
            frequency,
            group_velocity,
            packet_width,
            _padding: [0.0; 3],
        }
    }
}

/// A pluggable per-point field computation
pub trait FieldFunction: Send + Sync {
    /// Short name used in logs and the run manifest
    fn name(&self) -> &'static str;

    /// Field value at `position` and elapsed time `time`
    fn evaluate(&self, position: Vector2<f32>, time: f32, params: &FieldParams) -> f32;

    /// WGSL source defining `field_value`, if this function can run on the device
    fn wgsl(&self) -> Option<&'static str> {
        None
    }
}
