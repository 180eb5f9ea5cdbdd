use super::{FieldFunction, FieldParams};
use nalgebra::Vector2;

/// Trivial field equal to the elapsed time at every point
///
/// Useful for checking that every point of a step observes the same clock value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElapsedTime;

impl FieldFunction for ElapsedTime {
    fn name(&self) -> &'static str {
        "elapsed-time"
    }

    fn evaluate(&self, _position: Vector2<f32>, time: f32, _params: &FieldParams) -> f32 {
        time
    }

    fn wgsl(&self) -> Option<&'static str> {
        Some(
            r"
fn field_value(pos: vec2<f32>, t: f32) -> f32 {
    return t;
}
",
        )
    }
}
