//! Deterministic placement of sample points on the plot disk

use super::SamplePoint;
use crate::config::Placement;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

/// Radial and angular step counts for a polar sweep of `n` points
///
/// Both counts are rounded up so the sweep produces at least `n` samples; the
/// surplus is discarded by [`place_points`].
#[must_use]
pub fn polar_grid(n: usize) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let radial = (n as f64).sqrt().ceil() as usize;
    let angular = n.div_ceil(radial);
    (radial, angular)
}

/// Fill `out` with exactly `out.len()` positions inside a disk of radius `limit`
///
/// Field values are reset to zero. Positions are never touched again after this call.
pub fn place_points(out: &mut [SamplePoint], limit: f32, placement: Placement) {
    match placement {
        Placement::Polar => place_polar(out, limit),
        Placement::SeededUniform { seed } => place_uniform(out, limit, seed),
    }
}

fn place_polar(out: &mut [SamplePoint], limit: f32) {
    let (radial, angular) = polar_grid(out.len());
    if radial == 0 {
        return;
    }
    let dr = limit / radial as f32;
    let dtheta = TAU / angular as f32;

    let sweep = (0..radial).flat_map(|i| {
        let r = i as f32 * dr;
        (0..angular).map(move |j| {
            let theta = j as f32 * dtheta;
            SamplePoint::at(r * theta.cos(), r * theta.sin())
        })
    });

    // zip stops at out.len(): samples past N are dropped, never written
    for (slot, point) in out.iter_mut().zip(sweep) {
        *slot = point;
    }
}

fn place_uniform(out: &mut [SamplePoint], limit: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for slot in out.iter_mut() {
        // sqrt keeps the density uniform in area
        let r = limit * rng.random::<f32>().sqrt();
        let theta = TAU * rng.random::<f32>();
        *slot = SamplePoint::at(r * theta.cos(), r * theta.sin());
    }
}
