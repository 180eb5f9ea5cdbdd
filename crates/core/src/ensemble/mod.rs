//! Point ensemble
//!
//! The fixed-length sequence of sample points, its deterministic placement on the
//! plot disk, and the host-side mirror that tracks how fresh it is relative to the
//! device copy.

mod mirror;
mod placement;

pub use mirror::EnsembleMirror;
pub use placement::{place_points, polar_grid};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "gpu")]
use bytemuck::{Pod, Zeroable};

/// One ensemble element: a write-once position and the field value of the last step
///
/// Layout matches the `SamplePoint` struct in the field kernel shader (three `f32`, 12-byte stride).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "gpu", derive(Pod, Zeroable))]
pub struct SamplePoint {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
    /// Field value computed by the most recent kernel pass
    pub field: f32,
}

impl SamplePoint {
    /// Point at `(x, y)` with no field value yet
    #[must_use]
    pub fn at(x: f32, y: f32) -> Self {
        Self { x, y, field: 0.0 }
    }

    /// Position as a vector
    #[must_use]
    pub fn position(&self) -> Vector2<f32> {
        Vector2::new(self.x, self.y)
    }
}

/// Bytes occupied by `count` points on either side
#[must_use]
pub fn ensemble_bytes(count: usize) -> u64 {
    (count as u64) * std::mem::size_of::<SamplePoint>() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_is_three_floats() {
        assert_eq!(std::mem::size_of::<SamplePoint>(), 12);
        assert_eq!(ensemble_bytes(4), 48);
    }

    #[test]
    fn test_position_vector() {
        let p = SamplePoint::at(3.0, 4.0);
        assert_eq!(p.position().norm(), 5.0);
        assert_eq!(p.field, 0.0);
    }
}
