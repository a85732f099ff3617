//! uwbfuse - delay-compensated IMU + UWB fusion from the command line

mod io;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uwbfuse_core::{Estimate, FusionConfig, FusionEngine, FusionWorker};
use uwbfuse_sim::{generate_events, run_scenario, CircleTrajectory, SensorConfig};

#[derive(Parser, Debug)]
#[command(name = "uwbfuse")]
#[command(about = "Delay-compensated IMU + UWB pose estimator")]
#[command(version)]
struct Cli {
    /// JSON configuration file (missing keys fall back to defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    tuning: TuningArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fuse a simulated circle trajectory and report the error against truth
    Simulate(SimulateArgs),
    /// Fuse recorded IMU and UWB logs
    Replay(ReplayArgs),
    /// Print the effective configuration as JSON
    Config,
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Default)]
struct TuningArgs {
    #[arg(long, global = true)]
    gyro_noise: Option<f64>,

    #[arg(long, global = true)]
    accel_noise: Option<f64>,

    #[arg(long, global = true)]
    r_position: Option<f64>,

    #[arg(long, global = true)]
    history_entries: Option<usize>,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long, default_value_t = 10.0)]
    duration: f64,

    #[arg(long, default_value_t = 400.0)]
    imu_rate: f64,

    #[arg(long, default_value_t = 50.0)]
    uwb_rate: f64,

    /// UWB delivery delay (s)
    #[arg(long, default_value_t = 0.02)]
    latency: f64,

    #[arg(long, default_value_t = 1.0)]
    noise_scale: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 2.0)]
    radius: f64,

    #[arg(long, default_value_t = 0.5)]
    angular_rate: f64,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// `timestamp,gx,gy,gz,ax,ay,az`
    #[arg(long)]
    imu: PathBuf,

    /// `timestamp,x,y[,arrival]`
    #[arg(long)]
    uwb: PathBuf,

    #[arg(short, long, default_value = "estimates.csv")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref(), &cli.tuning)?;

    match cli.command {
        Commands::Simulate(args) => run_simulate(&args, config),
        Commands::Replay(args) => run_replay(&args, config),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>, tuning: &TuningArgs) -> Result<FusionConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            FusionConfig::from_json_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => FusionConfig::default(),
    };

    if let Some(v) = tuning.gyro_noise {
        config.noise.gyro_noise = v;
    }
    if let Some(v) = tuning.accel_noise {
        config.noise.accel_noise = v;
    }
    if let Some(v) = tuning.r_position {
        config.noise.r_position = v;
    }
    if let Some(n) = tuning.history_entries {
        config.history.max_entries = n;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Simulate
// ---------------------------------------------------------------------------
fn run_simulate(args: &SimulateArgs, config: FusionConfig) -> Result<()> {
    let trajectory = CircleTrajectory {
        radius: args.radius,
        angular_rate: args.angular_rate,
        gravity: config.gravity_vector(),
        ..CircleTrajectory::default()
    };
    let sensors = SensorConfig {
        imu_rate_hz: args.imu_rate,
        uwb_rate_hz: args.uwb_rate,
        uwb_latency_s: args.latency,
        noise_scale: args.noise_scale,
        // Fixes are reported in the UWB frame the estimator rotates out of.
        uwb_frame: config.frame_rotation().inverse(),
        seed: args.seed,
        ..SensorConfig::default()
    };

    info!(
        "simulating {:.1} s: IMU {} Hz, UWB {} Hz, latency {} s",
        args.duration, args.imu_rate, args.uwb_rate, args.latency
    );
    let events = generate_events(&trajectory, args.duration, &sensors)
        .context("invalid sensor noise settings")?;
    let result = run_scenario(&events, &trajectory, config, trajectory.nominal_state(0.0))?;

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let path = args.output_dir.join("estimates.csv");
    io::write_estimates_file(
        &path,
        result
            .records
            .iter()
            .map(|r| (&r.estimate, Some(r.truth_position))),
    )?;

    let s = result.stats;
    println!("Samples:       {}", result.records.len());
    println!("Corrections:   {} ({} stale)", s.corrections, s.stale_corrections);
    println!("Replayed:      {}", s.replayed_samples);
    println!("Rejected:      {}", result.statuses.rejected);
    println!("RMS error:     {:.4} m", result.rms_horizontal_error());
    println!("Max error:     {:.4} m", result.max_horizontal_error());
    println!("\nEstimates written to {:?}", path);
    Ok(())
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------
fn run_replay(args: &ReplayArgs, config: FusionConfig) -> Result<()> {
    let imu = io::read_imu_file(&args.imu)?;
    let uwb = io::read_uwb_file(&args.uwb)?;
    info!("replaying {} IMU samples and {} UWB fixes", imu.len(), uwb.len());
    let events = io::merge_by_arrival(imu, uwb);

    let (tx, rx) = crossbeam_channel::unbounded::<Estimate>();
    let engine = FusionEngine::new(config, tx)?;
    let worker = FusionWorker::spawn(engine);
    let handle = worker.handle();
    for timed in &events {
        handle.submit(timed.event)?;
    }
    drop(handle);

    let engine = worker.join()?;
    let stats = engine.stats();
    // Dropping the engine closes the estimate channel.
    drop(engine);
    let estimates: Vec<Estimate> = rx.iter().collect();

    io::write_estimates_file(&args.output, estimates.iter().map(|e| (e, None)))?;

    println!("Propagated:    {}", stats.propagated);
    println!("Corrections:   {} ({} stale)", stats.corrections, stats.stale_corrections);
    println!("Rejected:      {} samples", stats.rejected_samples);
    println!("Singular:      {}", stats.singular_aborts);
    println!("\nEstimates written to {:?}", args.output);
    Ok(())
}
