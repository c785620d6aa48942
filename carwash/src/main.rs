//! Single carwash run.
//!
//! Usage:
//!   cargo run --release --bin carwash -- --config config/baseline.toml -v

use std::path::PathBuf;
use std::process::ExitCode;

use carwash::logging::{init_tracing, level_from_verbosity};
use carwash::{ExperimentConfig, run_simulation};
use clap::Parser;

#[derive(Parser)]
#[command(name = "carwash")]
#[command(about = "Simulate a carwash with a limited number of machines")]
struct Cli {
    /// TOML experiment file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the configured horizon, in minutes
    #[arg(long)]
    horizon: Option<f64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(level_from_verbosity(cli.verbose));

    let config = ExperimentConfig::load(cli.config.as_deref()).and_then(|mut config| {
        if let Some(seed) = cli.seed {
            config.carwash.seed = seed;
        }
        if let Some(horizon) = cli.horizon {
            config.carwash.horizon = horizon;
        }
        config.validate()?;
        Ok(config.carwash)
    });
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let horizon = config.horizon;

    println!("=== Carwash ===\n");
    println!(
        "Machines: {}, wash time: {} min, arrival scale: {} min ({:?}), seed: {}",
        config.num_machines, config.wash_time, config.t_inter, config.arrivals, config.seed
    );

    let report = match run_simulation(&config, horizon) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Horizon:        {:.0} min", report.horizon);
    println!("Cars arrived:   {}", report.log.cars_arrived);
    println!("Cars washed:    {}", report.log.cars_washed);
    println!("Still queued:   {}", report.still_queued());
    println!("Peak queue:     {}", report.machine.peak_queue_len);
    println!("Mean wait:      {:.2} min", report.mean_wait());
    println!("Throughput:     {:.2} cars/hour", report.throughput());
    println!(
        "Events:         {} ({} stale)",
        report.events.events_processed, report.events.stale_events
    );

    ExitCode::SUCCESS
}
