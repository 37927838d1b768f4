use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_ENV: &str = "MESHVAULT_LOG";

/// Installs the global subscriber, writing to stderr so command output on
/// stdout stays clean.
///
/// `MESHVAULT_LOG` takes `EnvFilter` directives; without it the level follows
/// the verbosity flag, starting at `info`.
pub fn init(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}
