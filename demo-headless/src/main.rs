use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wavepacket_core::{
    create_backend, BackendChoice, DirectoryEmitter, DiscardEmitter, ElapsedTime,
    ErrorCheckMode, FieldFunction, FieldParams, Placement, ProgressReporter, RunConfig,
    RunSummary, SimError, Simulation, WavePacket, WavePacketInputs,
};

/// Evolve a wave-packet field over a point ensemble and export snapshots
#[derive(Parser, Debug)]
#[command(name = "wavepacket")]
#[command(about = "Data-parallel wave-packet ensemble simulation", long_about = None)]
struct Args {
    /// Directory for snapshot files (no snapshots are written if omitted)
    output: Option<PathBuf>,

    /// Number of sample points
    #[arg(short = 'n', long, default_value_t = 1 << 20)]
    points: usize,

    /// Number of time steps
    #[arg(short, long, default_value_t = 10_000)]
    steps: u64,

    /// Steps between snapshots
    #[arg(short, long, default_value_t = 100)]
    cadence: u64,

    /// Time step in seconds
    #[arg(long, default_value_t = 0.0005)]
    dt: f64,

    /// Plot boundary radius in meters
    #[arg(short, long, default_value_t = 10.0)]
    limit: f32,

    /// Scatter points uniformly from this seed instead of the polar sweep
    #[arg(long)]
    seed: Option<u64>,

    /// Field function to evaluate
    #[arg(short, long, value_enum, default_value_t = KernelArg::WavePacket)]
    kernel: KernelArg,

    /// Wave amplitude
    #[arg(long, default_value_t = 1.0)]
    amplitude: f32,

    /// Central wavelength in meters
    #[arg(long, default_value_t = 1.0)]
    wavelength: f32,

    /// Packet width relative to the central wavenumber
    #[arg(long, default_value_t = 0.1)]
    bandwidth: f32,

    /// Execution backend
    #[arg(short, long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Device error checking (defaults to per-op in debug builds, deferred in release)
    #[arg(long, value_enum)]
    check: Option<CheckArg>,

    /// List GPU adapters and exit
    #[arg(long)]
    list_devices: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KernelArg {
    WavePacket,
    ElapsedTime,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Auto,
    Gpu,
    Host,
}

impl From<BackendArg> for BackendChoice {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => Self::Auto,
            BackendArg::Gpu => Self::Gpu,
            BackendArg::Host => Self::Host,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CheckArg {
    PerOp,
    Deferred,
}

impl From<CheckArg> for ErrorCheckMode {
    fn from(arg: CheckArg) -> Self {
        match arg {
            CheckArg::PerOp => Self::PerOperation,
            CheckArg::Deferred => Self::Deferred,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Stdout carries the progress protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.list_devices {
        list_devices();
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(summary) => {
            info!(
                "Finished {} steps ({} snapshots) in {:.2}s",
                summary.steps, summary.snapshots, summary.wall_seconds
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("wavepacket: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<RunSummary, SimError> {
    let config = RunConfig {
        points: args.points,
        max_steps: args.steps,
        snapshot_cadence: args.cadence,
        dt: args.dt,
        limit: args.limit,
        placement: args
            .seed
            .map_or(Placement::Polar, |seed| Placement::SeededUniform { seed }),
        check_mode: args.check.map_or_else(ErrorCheckMode::default, Into::into),
    };
    config.validate()?;

    let (function, params): (Arc<dyn FieldFunction>, FieldParams) = match args.kernel {
        KernelArg::WavePacket => {
            let inputs = WavePacketInputs {
                amplitude: args.amplitude,
                wavelength: args.wavelength,
                relative_bandwidth: args.bandwidth,
                ..WavePacketInputs::default()
            };
            inputs.validate()?;
            (Arc::new(WavePacket), inputs.derive())
        }
        KernelArg::ElapsedTime => (Arc::new(ElapsedTime), FieldParams::default()),
    };

    let backend = create_backend(args.backend.into(), function, config.check_mode)?;
    let mut simulation = Simulation::new(config, params, backend)?;
    let mut reporter = ProgressReporter::new(std::io::stdout().lock());

    match &args.output {
        Some(dir) => {
            let mut emitter = DirectoryEmitter::new(dir)?;
            simulation.run(&mut emitter, &mut reporter)
        }
        None => simulation.run(&mut DiscardEmitter, &mut reporter),
    }
}

#[cfg(feature = "gpu")]
fn list_devices() {
    let candidates = wavepacket_core::GpuContext::enumerate();
    if candidates.is_empty() {
        println!("No GPU adapters found");
    }
    for candidate in &candidates {
        let watchdog = if candidate.watchdog { " [watchdog]" } else { "" };
        println!("{candidate}{watchdog}");
    }
    if let Ok(best) = wavepacket_core::select_best(&candidates) {
        println!("Auto-selected: [{}] {}", best.index, best.name);
    }
}

#[cfg(not(feature = "gpu"))]
fn list_devices() {
    println!("Built without the gpu feature; only the host backend is available");
}
