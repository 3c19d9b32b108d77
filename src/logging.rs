//! Diagnostic logging setup
//!
//! Diagnostics go to stderr through `tracing`; chain events are recorded
//! separately by the `audit` module.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter (e.g. `debug`, `diffback=trace`)
pub const LOG_ENV_VAR: &str = "DIFFBACK_LOG";

/// Install the global subscriber
///
/// `verbose` raises the default level to `debug`; an explicit
/// `DIFFBACK_LOG` always wins. Calling this twice is harmless.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
