//! Growing-horizon timing harness
//!
//! Reruns the carwash for 1, 2, ... `days` simulated days. Every iteration is
//! reseeded with the same seed, so each day count repeats an identical run
//! and the mean wall-clock time measures the kernel alone.
//!
//! Usage:
//!   cargo run --release --bin benchmark -- --config config/baseline.toml

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use carwash::logging::{init_tracing, level_from_verbosity};
use carwash::{ExperimentConfig, MINUTES_PER_DAY, run_simulation};
use clap::Parser;

#[derive(Parser)]
#[command(name = "benchmark")]
#[command(about = "Time carwash runs over a growing number of simulated days")]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured number of days
    #[arg(long)]
    days: Option<usize>,

    /// Override the configured iterations per day count
    #[arg(long)]
    iterations: Option<usize>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(level_from_verbosity(cli.verbose));

    let config = ExperimentConfig::load(cli.config.as_deref()).and_then(|mut config| {
        if let Some(days) = cli.days {
            config.benchmark.days = days;
        }
        if let Some(iterations) = cli.iterations {
            config.benchmark.iterations = iterations;
        }
        config.validate()?;
        Ok(config)
    });
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let days = config.benchmark.days;
    let iterations = config.benchmark.iterations;

    for day in 1..=days {
        let horizon = day as f64 * MINUTES_PER_DAY;
        let start_time = Instant::now();

        for _ in 0..iterations {
            if let Err(e) = run_simulation(&config.carwash, horizon) {
                eprintln!("Error on day {}: {}", day, e);
                return ExitCode::FAILURE;
            }
        }

        let run_time = start_time.elapsed().as_secs_f64() / iterations as f64;
        println!(
            "Sim-Days: {}, Mean run-time: {:.2} seconds, {:.2} sec/day",
            day,
            run_time,
            run_time / day as f64
        );
    }

    ExitCode::SUCCESS
}
