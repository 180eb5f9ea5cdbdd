#![cfg(feature = "gpu")]
//! GPU vs host consistency
//!
//! Runs the same configuration through both backends and compares every snapshot.
//! If no adapter is available the tests pass (graceful degradation).

use approx::assert_relative_eq;
use std::sync::Arc;
use wavepacket_core::{
    ElapsedTime, ErrorCheckMode, FieldFunction, FieldParams, GpuBackend,
    GpuContext, HostBackend, Placement, ProgressReporter, RunConfig, SamplePoint, SimError,
    Simulation, Snapshot, SnapshotEmitter, WavePacket, WavePacketInputs,
};

/// Field tolerance: WGSL `sin`/`cos` are not required to be correctly rounded
const FIELD_TOLERANCE: f32 = 2e-3;

#[derive(Default)]
struct Recorder {
    points: Vec<Vec<SamplePoint>>,
}

impl SnapshotEmitter for Recorder {
    fn emit(&mut self, snapshot: &Snapshot<'_>) -> Result<(), SimError> {
        self.points.push(snapshot.points.to_vec());
        Ok(())
    }
}

fn gpu_backend(function: &dyn FieldFunction, mode: ErrorCheckMode) -> Option<GpuBackend> {
    match GpuContext::select_with(None) {
        Ok(context) => Some(GpuBackend::new(context, function, mode).unwrap()),
        Err(e) => {
            eprintln!("No usable GPU, skipping: {e}");
            None
        }
    }
}

fn run(simulation: &mut Simulation) -> Recorder {
    let mut recorder = Recorder::default();
    let mut reporter = ProgressReporter::new(Vec::new());
    simulation.run(&mut recorder, &mut reporter).unwrap();
    recorder
}

fn compare(gpu: &Recorder, host: &Recorder) {
    assert_eq!(gpu.points.len(), host.points.len());
    for (g_snapshot, h_snapshot) in gpu.points.iter().zip(&host.points) {
        assert_eq!(g_snapshot.len(), h_snapshot.len());
        for (g, h) in g_snapshot.iter().zip(h_snapshot) {
            assert_eq!(g.x, h.x);
            assert_eq!(g.y, h.y);
            assert_relative_eq!(
                g.field,
                h.field,
                epsilon = FIELD_TOLERANCE,
                max_relative = FIELD_TOLERANCE
            );
        }
    }
}

#[test]
fn test_wave_packet_gpu_matches_host() {
    let params = WavePacketInputs::default().derive();
    let config = RunConfig {
        points: 10_000,
        max_steps: 50,
        snapshot_cadence: 10,
        dt: 0.01,
        limit: 10.0,
        placement: Placement::Polar,
        check_mode: ErrorCheckMode::PerOperation,
    };

    let Some(gpu) = gpu_backend(&WavePacket, config.check_mode) else {
        return;
    };
    let mut on_gpu = Simulation::new(config.clone(), params, Box::new(gpu)).unwrap();
    let mut on_host = Simulation::new(
        config,
        params,
        Box::new(HostBackend::new(Arc::new(WavePacket))),
    )
    .unwrap();

    compare(&run(&mut on_gpu), &run(&mut on_host));
}

#[test]
fn test_deferred_checking_elapsed_time() {
    let config = RunConfig {
        points: 4,
        max_steps: 2,
        snapshot_cadence: 1,
        dt: 0.0005,
        limit: 1.0,
        placement: Placement::Polar,
        check_mode: ErrorCheckMode::Deferred,
    };

    let Some(gpu) = gpu_backend(&ElapsedTime, config.check_mode) else {
        return;
    };
    let mut simulation = Simulation::new(config, FieldParams::default(), Box::new(gpu)).unwrap();
    let recorder = run(&mut simulation);

    assert_eq!(recorder.points.len(), 2);
    assert!(recorder.points[0].iter().all(|p| p.field == 0.0005));
    assert!(recorder.points[1].iter().all(|p| p.field == 0.001));
    assert!(!simulation.backend().is_allocated());
}
