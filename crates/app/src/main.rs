use std::{fs::File, io::BufWriter, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use tempo_tracker_core::EngineConfig;
use tracing_subscriber::EnvFilter;

mod simulation;

use simulation::{SignalSource, SimulationSettings};

fn main() -> tempo_tracker_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => run_simulate(args),
        Commands::Defaults => print_defaults(),
    }
}

fn run_simulate(args: SimulateArgs) -> tempo_tracker_core::Result<()> {
    let config = match &args.config {
        Some(path) => {
            tracing::info!(?path, "loading engine config");
            EngineConfig::load(path)?
        }
        None => EngineConfig::default(),
    };

    let settings = SimulationSettings {
        bpm: args.bpm,
        seconds: args.seconds,
        frame_ms: args.frame_ms,
        jitter: args.jitter,
        seed: args.seed,
        source: args.source,
        monitored_band: args.monitor,
        ..Default::default()
    };

    let log = simulation::run(&config, &settings)?;
    tracing::info!(
        calls = log.total_calls,
        kicks = log.kicks,
        peak_level = log.peak_level,
        "simulation finished"
    );

    match &args.output {
        Some(path) => {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &log)?;
            tracing::info!(?path, "log written");
        }
        None => println!("{}", serde_json::to_string_pretty(&log)?),
    }
    Ok(())
}

fn print_defaults() -> tempo_tracker_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-band tempo tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a simulated beat train through one tracker per band.
    Simulate(SimulateArgs),
    /// Print the default engine configuration as JSON.
    Defaults,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Tempo of the simulated beat train.
    #[arg(long, default_value_t = 145.5)]
    bpm: f32,
    /// Length of the simulation in seconds.
    #[arg(long, default_value_t = 30.0)]
    seconds: f32,
    /// Interval between frames in milliseconds.
    #[arg(long, default_value_t = 16.0)]
    frame_ms: f32,
    /// Random variation of each beat interval as a fraction of the period.
    #[arg(long, default_value_t = 0.0)]
    jitter: f32,
    /// Seed for the noise and jitter generators.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// How frame buffers are synthesised.
    #[arg(long, value_enum, default_value_t = SignalSource::Noise)]
    source: SignalSource,
    /// Index of the band the level meter and kick detector follow.
    #[arg(long, default_value_t = 1)]
    monitor: usize,
    /// JSON engine configuration; defaults apply to missing fields.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Where to write the JSON log. Printed to stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}
