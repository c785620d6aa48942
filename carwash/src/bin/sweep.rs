//! Seed sweep
//!
//! Runs seeds `seed..seed + scenarios` in parallel, one environment per
//! worker, and prints per-seed throughput and waiting time.
//!
//! Usage:
//!   cargo run --release --bin sweep -- --config config/baseline.toml --threads 4

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use carwash::logging::{init_tracing, level_from_verbosity};
use carwash::{CarwashConfig, ExperimentConfig, run_simulation};
use clap::Parser;
use des::parallel::{ParallelRunner, simple_progress_reporter};

#[derive(Parser)]
#[command(name = "sweep")]
#[command(about = "Run many carwash seeds in parallel")]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured number of seeds
    #[arg(long)]
    scenarios: Option<usize>,

    /// Override the configured worker threads
    #[arg(long)]
    threads: Option<usize>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(level_from_verbosity(cli.verbose));

    let config = ExperimentConfig::load(cli.config.as_deref()).and_then(|mut config| {
        if let Some(scenarios) = cli.scenarios {
            config.sweep.scenarios = scenarios;
        }
        if cli.threads.is_some() {
            config.sweep.threads = cli.threads;
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
    let scenarios = config.sweep.scenarios;
    let base = config.carwash.clone();

    println!("=== Carwash Seed Sweep ===\n");
    println!(
        "{} seeds from {}, horizon {} min\n",
        scenarios, base.seed, base.horizon
    );

    let start_time = Instant::now();
    let mut runner = ParallelRunner::new(scenarios, |scenario_id| {
        let config = CarwashConfig {
            seed: base.seed.wrapping_add(scenario_id as u64),
            ..base.clone()
        };
        run_simulation(&config, config.horizon)
    })
    .progress(simple_progress_reporter(10));
    if let Some(threads) = config.sweep.threads {
        runner = runner.num_threads(threads);
    }
    let results = runner.run();
    let elapsed = start_time.elapsed();

    println!(
        "\n{:>8} {:>8} {:>8} {:>12} {:>10}",
        "seed", "washed", "queued", "mean wait", "cars/hour"
    );
    let mut failures = 0;
    let mut waits = Vec::with_capacity(results.len());
    for (scenario_id, result) in results.iter().enumerate() {
        let seed = base.seed.wrapping_add(scenario_id as u64);
        match result {
            Ok(report) => {
                waits.push(report.mean_wait());
                println!(
                    "{:>8} {:>8} {:>8} {:>12.2} {:>10.2}",
                    seed,
                    report.log.cars_washed,
                    report.still_queued(),
                    report.mean_wait(),
                    report.throughput()
                );
            }
            Err(e) => {
                failures += 1;
                println!("{:>8} failed: {}", seed, e);
            }
        }
    }

    if !waits.is_empty() {
        let mean = waits.iter().sum::<f64>() / waits.len() as f64;
        println!("\nMean wait across seeds: {:.2} min", mean);
    }
    println!("Wall-clock: {:.2}s", elapsed.as_secs_f64());

    if failures > 0 {
        eprintln!("{} of {} seeds failed", failures, scenarios);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
