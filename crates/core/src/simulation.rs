//! Host-side orchestration loop
//!
//! Drives a run through `Uninitialized → Running → Completed`, or `Failed` on the
//! first error. Each step advances the clock once on this thread, then dispatches
//! one kernel pass with the new time as an immutable input. Snapshot steps pull the
//! ensemble back to the host before handing it to the emitter.

use crate::backend::EnsembleBackend;
use crate::clock::SimulationClock;
use crate::config::RunConfig;
use crate::ensemble::EnsembleMirror;
use crate::error::SimError;
use crate::kernel::FieldParams;
use crate::report::ProgressReporter;
use crate::snapshot::{RunManifest, Snapshot, SnapshotEmitter};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Instant;
use tracing::{debug, error, info};

/// Parameters and clock of one run
///
/// Owned per [`Simulation`], so independent runs never share time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationContext {
    /// Device parameter set
    pub params: FieldParams,
    /// Elapsed simulation time
    pub clock: SimulationClock,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing allocated yet
    Uninitialized,
    /// Storage on both domains, `step` is the next step to execute
    Running {
        /// Next step index
        step: u64,
    },
    /// All steps executed and storage released
    Completed,
    /// Aborted by an error; storage released
    Failed,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Steps executed
    pub steps: u64,
    /// Snapshots emitted
    pub snapshots: u64,
    /// Simulation time at the end of the run
    pub final_time: f64,
    /// Host wall-clock seconds from start to completion
    pub wall_seconds: f64,
}

/// One simulation run
pub struct Simulation {
    config: RunConfig,
    context: SimulationContext,
    backend: Box<dyn EnsembleBackend>,
    mirror: Option<EnsembleMirror>,
    state: RunState,
    started: Option<Instant>,
    snapshots: u64,
}

impl Simulation {
    /// Build a run from a validated configuration
    ///
    /// # Errors
    /// Returns [`SimError::InvalidConfig`] if `config` fails validation
    pub fn new(
        config: RunConfig,
        params: FieldParams,
        backend: Box<dyn EnsembleBackend>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self {
            context: SimulationContext {
                params,
                clock: SimulationClock::new(config.dt),
            },
            config,
            backend,
            mirror: None,
            state: RunState::Uninitialized,
            started: None,
            snapshots: 0,
        })
    }

    /// Execute every step, emitting snapshots and progress records
    ///
    /// # Errors
    /// The first error raised by allocation, the device, the emitter or the reporter.
    /// The run is left in [`RunState::Failed`] with storage released.
    pub fn run<W: Write>(
        &mut self,
        emitter: &mut dyn SnapshotEmitter,
        reporter: &mut ProgressReporter<W>,
    ) -> Result<RunSummary, SimError> {
        self.start(emitter, reporter)?;
        while matches!(self.state, RunState::Running { .. }) {
            self.step(emitter, reporter)?;
        }
        Ok(self.summary())
    }

    /// `Uninitialized → Running`: allocate, place, upload and write the run header
    ///
    /// # Errors
    /// [`SimError::InvalidConfig`] if already started, otherwise allocation, device
    /// and I/O errors
    pub fn start<W: Write>(
        &mut self,
        emitter: &mut dyn SnapshotEmitter,
        reporter: &mut ProgressReporter<W>,
    ) -> Result<(), SimError> {
        if self.state != RunState::Uninitialized {
            return Err(SimError::InvalidConfig(format!(
                "cannot start a run in state {:?}",
                self.state
            )));
        }
        self.try_start(emitter, reporter).map_err(|e| self.fail(e))?;
        if self.config.max_steps == 0 {
            self.finish(reporter)?;
        }
        Ok(())
    }

    fn try_start<W: Write>(
        &mut self,
        emitter: &mut dyn SnapshotEmitter,
        reporter: &mut ProgressReporter<W>,
    ) -> Result<(), SimError> {
        info!(
            "Starting run: {} points, {} steps, dt={}, kernel '{}' on {}",
            self.config.points,
            self.config.max_steps,
            self.config.dt,
            self.backend.kernel_name(),
            self.backend.device()
        );

        let mirror = self.mirror.insert(EnsembleMirror::allocate(self.config.points)?);
        mirror.place(self.config.limit, self.config.placement)?;

        self.backend.upload_params(&self.context.params)?;
        mirror.push_to_device(self.backend.as_mut())?;
        self.backend.check("initial upload")?;

        let started = Utc::now();
        self.started = Some(Instant::now());
        reporter.header(
            started,
            self.config.points,
            self.config.max_steps,
            self.config.dt,
        )?;
        emitter.begin(&RunManifest {
            started,
            kernel: self.backend.kernel_name().to_string(),
            device: self.backend.device().clone(),
            config: self.config.clone(),
            params: self.context.params,
            expected_snapshots: self.config.expected_snapshots(),
        })?;

        self.state = RunState::Running { step: 0 };
        Ok(())
    }

    /// Execute the next step, completing the run after the last one
    ///
    /// # Errors
    /// [`SimError::InvalidConfig`] if the run is not in progress, otherwise device,
    /// emitter and reporter errors
    pub fn step<W: Write>(
        &mut self,
        emitter: &mut dyn SnapshotEmitter,
        reporter: &mut ProgressReporter<W>,
    ) -> Result<(), SimError> {
        let RunState::Running { step } = self.state else {
            return Err(SimError::InvalidConfig(format!(
                "cannot step a run in state {:?}",
                self.state
            )));
        };

        self.try_step(step, emitter, reporter)
            .map_err(|e| self.fail(e))?;

        let next = step + 1;
        self.state = RunState::Running { step: next };
        if next >= self.config.max_steps {
            self.finish(reporter)?;
        }
        Ok(())
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "Kernel time input is f32 on every backend"
    )]
    fn try_step<W: Write>(
        &mut self,
        step: u64,
        emitter: &mut dyn SnapshotEmitter,
        reporter: &mut ProgressReporter<W>,
    ) -> Result<(), SimError> {
        let time = self.context.clock.advance();
        self.backend.dispatch(time as f32)?;

        let Some(mirror) = self.mirror.as_mut() else {
            return Err(SimError::device("dispatch field kernel", "ensemble not allocated"));
        };
        mirror.record_device_pass();

        if !self.config.is_snapshot_step(step) {
            return Ok(());
        }

        let points = mirror.pull_from_device(self.backend.as_mut())?;
        emitter.emit(&Snapshot {
            step,
            time,
            limit: self.config.limit,
            points,
        })?;
        self.snapshots += 1;
        reporter.progress(step, self.wall_seconds(), time)?;
        debug!("Snapshot at step {} (t={})", step, time);
        Ok(())
    }

    /// `Running → Completed`: surface pending device errors, release storage, report
    fn finish<W: Write>(&mut self, reporter: &mut ProgressReporter<W>) -> Result<(), SimError> {
        self.backend
            .check("final synchronization")
            .map_err(|e| self.fail(e))?;
        self.release();
        self.state = RunState::Completed;
        reporter.completion(Utc::now())?;
        info!(
            "Run complete: {} steps, {} snapshots, t={} in {:.3}s",
            self.context.clock.steps(),
            self.snapshots,
            self.context.clock.elapsed(),
            self.wall_seconds()
        );
        Ok(())
    }

    fn fail(&mut self, error: SimError) -> SimError {
        error!("Run failed: {}", error);
        self.release();
        self.state = RunState::Failed;
        error
    }

    fn release(&mut self) {
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.release();
        }
        self.backend.release();
    }

    fn wall_seconds(&self) -> f64 {
        self.started.map_or(0.0, |started| started.elapsed().as_secs_f64())
    }

    /// Summary of the steps executed so far
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            steps: self.context.clock.steps(),
            snapshots: self.snapshots,
            final_time: self.context.clock.elapsed(),
            wall_seconds: self.wall_seconds(),
        }
    }

    /// Parameters and clock
    #[must_use]
    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    /// Simulation clock
    #[must_use]
    pub fn clock(&self) -> &SimulationClock {
        &self.context.clock
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Host mirror of the ensemble, once started
    #[must_use]
    pub fn mirror(&self) -> Option<&EnsembleMirror> {
        self.mirror.as_ref()
    }

    /// Backend executing the kernel
    #[must_use]
    pub fn backend(&self) -> &dyn EnsembleBackend {
        self.backend.as_ref()
    }

    /// Run configuration
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::config::Placement;
    use crate::device::DeviceCandidate;
    use crate::ensemble::SamplePoint;
    use crate::kernel::ElapsedTime;
    use crate::snapshot::DiscardEmitter;
    use std::sync::Arc;

    fn config(points: usize, max_steps: u64, cadence: u64) -> RunConfig {
        RunConfig {
            points,
            max_steps,
            snapshot_cadence: cadence,
            dt: 0.0005,
            limit: 1.0,
            placement: Placement::Polar,
            ..RunConfig::default()
        }
    }

    fn simulation(config: RunConfig) -> Simulation {
        Simulation::new(
            config,
            FieldParams::default(),
            Box::new(HostBackend::new(Arc::new(ElapsedTime))),
        )
        .unwrap()
    }

    /// Keeps every emitted snapshot in memory
    #[derive(Default)]
    struct Recorder {
        snapshots: Vec<(u64, f64, Vec<SamplePoint>)>,
    }

    impl SnapshotEmitter for Recorder {
        fn emit(&mut self, snapshot: &Snapshot<'_>) -> Result<(), SimError> {
            self.snapshots
                .push((snapshot.step, snapshot.time, snapshot.points.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut sim = simulation(config(4, 2, 1));
        let mut reporter = ProgressReporter::new(Vec::new());
        assert_eq!(sim.state(), RunState::Uninitialized);

        sim.start(&mut DiscardEmitter, &mut reporter).unwrap();
        assert_eq!(sim.state(), RunState::Running { step: 0 });
        assert!(sim.backend().is_allocated());

        sim.step(&mut DiscardEmitter, &mut reporter).unwrap();
        assert_eq!(sim.state(), RunState::Running { step: 1 });
        sim.step(&mut DiscardEmitter, &mut reporter).unwrap();
        assert_eq!(sim.state(), RunState::Completed);

        assert!(!sim.backend().is_allocated());
        assert!(sim.step(&mut DiscardEmitter, &mut reporter).is_err());
        assert!(sim.start(&mut DiscardEmitter, &mut reporter).is_err());
    }

    #[test]
    fn test_field_sees_advanced_clock() {
        let mut sim = simulation(config(4, 2, 1));
        let mut recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(Vec::new());
        let summary = sim.run(&mut recorder, &mut reporter).unwrap();

        assert_eq!(summary.steps, 2);
        assert_eq!(summary.snapshots, 2);
        let (step0, t0, points0) = &recorder.snapshots[0];
        let (step1, t1, points1) = &recorder.snapshots[1];
        assert_eq!((*step0, *step1), (0, 1));
        assert_eq!(*t0, 0.0005);
        assert_eq!(*t1, 0.001);
        assert!(points0.iter().all(|p| p.field == 0.0005_f32));
        assert!(points1.iter().all(|p| p.field == 0.001_f32));
    }

    #[test]
    fn test_zero_steps_completes_immediately() {
        let mut sim = simulation(config(4, 0, 1));
        let mut recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(Vec::new());
        let summary = sim.run(&mut recorder, &mut reporter).unwrap();
        assert_eq!(summary.steps, 0);
        assert!(recorder.snapshots.is_empty());
        assert_eq!(sim.state(), RunState::Completed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Simulation::new(
            config(0, 2, 1),
            FieldParams::default(),
            Box::new(HostBackend::new(Arc::new(ElapsedTime))),
        );
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
    }

    /// Host backend that fails on request
    struct FaultyBackend {
        inner: HostBackend,
        fail_upload: bool,
        fail_dispatch_at: Option<u64>,
        dispatches: u64,
    }

    impl FaultyBackend {
        fn new(fail_upload: bool, fail_dispatch_at: Option<u64>) -> Self {
            Self {
                inner: HostBackend::new(Arc::new(ElapsedTime)),
                fail_upload,
                fail_dispatch_at,
                dispatches: 0,
            }
        }
    }

    impl EnsembleBackend for FaultyBackend {
        fn upload_params(&mut self, params: &FieldParams) -> Result<(), SimError> {
            self.inner.upload_params(params)
        }

        fn upload_points(&mut self, points: &[SamplePoint]) -> Result<(), SimError> {
            if self.fail_upload {
                return Err(SimError::Allocation {
                    operation: "allocate device ensemble",
                    bytes: std::mem::size_of_val(points) as u64,
                    message: "out of device memory".into(),
                });
            }
            self.inner.upload_points(points)
        }

        fn dispatch(&mut self, time: f32) -> Result<(), SimError> {
            let index = self.dispatches;
            self.dispatches += 1;
            if self.fail_dispatch_at == Some(index) {
                return Err(SimError::device("dispatch field kernel", "device lost"));
            }
            self.inner.dispatch(time)
        }

        fn download_points(&mut self, out: &mut [SamplePoint]) -> Result<(), SimError> {
            self.inner.download_points(out)
        }

        fn check(&mut self, operation: &str) -> Result<(), SimError> {
            self.inner.check(operation)
        }

        fn release(&mut self) {
            self.inner.release();
        }

        fn is_allocated(&self) -> bool {
            self.inner.is_allocated()
        }

        fn kernel_name(&self) -> &'static str {
            self.inner.kernel_name()
        }

        fn device(&self) -> &DeviceCandidate {
            self.inner.device()
        }

        fn is_accelerated(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_device_failure_mid_run_aborts() {
        let mut sim = Simulation::new(
            config(4, 6, 2),
            FieldParams::default(),
            Box::new(FaultyBackend::new(false, Some(3))),
        )
        .unwrap();
        let mut recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(Vec::new());
        let result = sim.run(&mut recorder, &mut reporter);

        assert!(matches!(result, Err(SimError::DeviceExecution { .. })));
        assert_eq!(sim.state(), RunState::Failed);
        assert!(!sim.backend().is_allocated());
        assert!(!sim.mirror().unwrap().is_allocated());

        // snapshots from steps 0 and 2 were emitted before step 3 failed
        let steps: Vec<u64> = recorder.snapshots.iter().map(|(step, _, _)| *step).collect();
        assert_eq!(steps, vec![0, 2]);
        assert_eq!(sim.summary().snapshots, 2);

        // no completion record after a failure
        let stdout = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(!stdout.contains("# finished"));
        assert!(sim.step(&mut recorder, &mut ProgressReporter::new(Vec::new())).is_err());
    }

    #[test]
    fn test_allocation_failure_releases_host_storage() {
        let mut sim = Simulation::new(
            config(16, 3, 1),
            FieldParams::default(),
            Box::new(FaultyBackend::new(true, None)),
        )
        .unwrap();
        let mut recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(Vec::new());
        let result = sim.run(&mut recorder, &mut reporter);

        assert!(matches!(result, Err(SimError::Allocation { .. })));
        assert_eq!(sim.state(), RunState::Failed);
        assert!(!sim.backend().is_allocated());
        assert!(!sim.mirror().unwrap().is_allocated());
        assert!(recorder.snapshots.is_empty());
        assert_eq!(sim.clock().steps(), 0);
    }

    struct FailingEmitter;

    impl SnapshotEmitter for FailingEmitter {
        fn emit(&mut self, _snapshot: &Snapshot<'_>) -> Result<(), SimError> {
            Err(SimError::Io {
                path: None,
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[test]
    fn test_emitter_failure_is_fatal() {
        let mut sim = simulation(config(4, 5, 1));
        let mut reporter = ProgressReporter::new(Vec::new());
        let result = sim.run(&mut FailingEmitter, &mut reporter);
        assert!(matches!(result, Err(SimError::Io { .. })));
        assert_eq!(sim.state(), RunState::Failed);
        assert!(!sim.backend().is_allocated());
        assert!(!sim.mirror().unwrap().is_allocated());
    }
}
