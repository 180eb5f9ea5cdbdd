//! Dispersive wave-packet envelope
//!
//! The packet travels radially outward at the group velocity:
//!
//! ```text
//! α = |x| − v_g·t
//! u = 2·A·dk · sin(dk·α) · cos(k·α) / (dk·α)
//! ```
//!
//! Parameters follow deep-water gravity waves, ω = √(g·k), so v_g = ω / (2k).

use super::{FieldFunction, FieldParams};
use crate::error::SimError;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Physical inputs the device parameter set is derived from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavePacketInputs {
    /// Peak amplitude in metres
    pub amplitude: f32,
    /// Central wavelength in metres
    pub wavelength: f32,
    /// Packet width as a fraction of the central wavenumber
    pub relative_bandwidth: f32,
    /// Gravitational acceleration in m/s²
    pub gravity: f32,
}

impl Default for WavePacketInputs {
    fn default() -> Self {
        Self {
            amplitude: 1.0,
            wavelength: 1.0,
            relative_bandwidth: 0.1,
            gravity: 9.81,
        }
    }
}

impl WavePacketInputs {
    /// Reject inputs that would put NaN or infinity into every field value
    ///
    /// # Errors
    /// Returns [`SimError::InvalidConfig`] naming the offending input
    pub fn validate(&self) -> Result<(), SimError> {
        if !self.amplitude.is_finite() {
            return Err(SimError::InvalidConfig(format!(
                "amplitude must be finite, got {}",
                self.amplitude
            )));
        }
        for (name, value) in [
            ("wavelength", self.wavelength),
            ("bandwidth", self.relative_bandwidth),
            ("gravity", self.gravity),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Derive the device parameter set
    #[must_use]
    pub fn derive(&self) -> FieldParams {
        let wavenumber = TAU / self.wavelength;
        let frequency = (self.gravity * wavenumber).sqrt();
        let group_velocity = 0.5 * frequency / wavenumber;
        let packet_width = self.relative_bandwidth * wavenumber;
        FieldParams::new(
            self.amplitude,
            wavenumber,
            frequency,
            group_velocity,
            packet_width,
        )
    }
}

/// The wave-packet field kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct WavePacket;

impl WavePacket {
    /// Value at `α = 0`, where `sin(dk·α)/(dk·α) → 1` and `cos(k·α) → 1`
    #[must_use]
    pub fn origin_limit(params: &FieldParams) -> f32 {
        2.0 * params.amplitude * params.packet_width
    }
}

impl FieldFunction for WavePacket {
    fn name(&self) -> &'static str {
        "wave-packet"
    }

    fn evaluate(&self, position: Vector2<f32>, time: f32, params: &FieldParams) -> f32 {
        let alpha = position.norm() - params.group_velocity * time;
        let x = params.packet_width * alpha;
        if x == 0.0 {
            return Self::origin_limit(params);
        }
        2.0 * params.amplitude * params.packet_width * x.sin() * (params.wavenumber * alpha).cos()
            / x
    }

    fn wgsl(&self) -> Option<&'static str> {
        Some(include_str!("wave_packet.wgsl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> FieldParams {
        WavePacketInputs::default().derive()
    }

    #[test]
    fn test_derived_parameters() {
        let p = params();
        assert_relative_eq!(p.wavenumber, TAU, epsilon = 1e-6);
        assert_relative_eq!(p.frequency, (9.81 * TAU).sqrt(), epsilon = 1e-5);
        assert_relative_eq!(p.group_velocity, p.frequency / (2.0 * p.wavenumber), epsilon = 1e-6);
        assert_relative_eq!(p.packet_width, 0.1 * TAU, epsilon = 1e-6);
        assert_eq!(p.amplitude, 1.0);
    }

    #[test]
    fn test_origin_is_analytic_limit() {
        let p = params();
        let value = WavePacket.evaluate(Vector2::zeros(), 0.0, &p);
        assert!(!value.is_nan());
        assert_eq!(value, WavePacket::origin_limit(&p));
    }

    #[test]
    fn test_singular_phase_away_from_origin() {
        let p = params();
        // α = 0 on the ring r = v_g·t
        let t = 2.0;
        let r = p.group_velocity * t;
        let value = WavePacket.evaluate(Vector2::new(r, 0.0), t, &p);
        assert!(value.is_finite());
        assert_relative_eq!(value, WavePacket::origin_limit(&p), epsilon = 1e-3);
    }

    #[test]
    fn test_underflowing_phase_takes_limit() {
        // α = 1e-6 but dk·α underflows to zero in f32
        let p = FieldParams::new(1.0, TAU, 0.0, 0.0, 1e-40);
        let value = WavePacket.evaluate(Vector2::new(1e-6, 0.0), 0.0, &p);
        assert!(!value.is_nan());
        assert_eq!(value, WavePacket::origin_limit(&p));
    }

    #[test]
    fn test_default_inputs_are_valid() {
        assert!(WavePacketInputs::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_physical_inputs() {
        let bad = [
            WavePacketInputs { relative_bandwidth: 0.0, ..WavePacketInputs::default() },
            WavePacketInputs { wavelength: -1.0, ..WavePacketInputs::default() },
            WavePacketInputs { wavelength: 0.0, ..WavePacketInputs::default() },
            WavePacketInputs { gravity: 0.0, ..WavePacketInputs::default() },
            WavePacketInputs { amplitude: f32::NAN, ..WavePacketInputs::default() },
            WavePacketInputs { relative_bandwidth: f32::INFINITY, ..WavePacketInputs::default() },
        ];
        for inputs in bad {
            assert!(
                matches!(inputs.validate(), Err(SimError::InvalidConfig(_))),
                "{inputs:?} accepted"
            );
        }
        // the accepted ones never derive NaN into the field
        let p = WavePacketInputs { amplitude: -2.0, ..WavePacketInputs::default() }.derive();
        assert!(WavePacket.evaluate(Vector2::new(1.0, 0.0), 0.5, &p).is_finite());
    }

    #[test]
    fn test_continuous_near_singularity() {
        let p = params();
        let near = WavePacket.evaluate(Vector2::new(1e-4, 0.0), 0.0, &p);
        assert_relative_eq!(near, WavePacket::origin_limit(&p), epsilon = 1e-3);
    }

    #[test]
    fn test_envelope_bounded_by_limit() {
        let p = params();
        let bound = WavePacket::origin_limit(&p).abs() + 1e-5;
        for i in 0..200 {
            let r = i as f32 * 0.05;
            let v = WavePacket.evaluate(Vector2::new(r, 0.0), 0.3, &p);
            assert!(v.abs() <= bound, "|u({r})| = {} exceeds {bound}", v.abs());
        }
    }

    #[test]
    fn test_radially_symmetric() {
        let p = params();
        let a = WavePacket.evaluate(Vector2::new(3.0, 4.0), 1.0, &p);
        let b = WavePacket.evaluate(Vector2::new(-5.0, 0.0), 1.0, &p);
        assert_relative_eq!(a, b, epsilon = 1e-6);
    }
}
