//! Tracing setup for the carwash binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Install a console subscriber on stderr. `RUST_LOG` overrides
/// `console_level`, e.g. `RUST_LOG=des=trace,carwash=debug`.
///
/// Result tables are printed to stdout, so logs never interleave with them
/// when output is redirected.
pub fn init_tracing(console_level: Level) {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    // A second call (tests, repeated setup) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(console_layer).try_init();
}

/// Map `-v` counts to a level: warn, info, debug, trace.
pub fn level_from_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
