//! # Structured Logging
//!
//! Sets up the `tracing` subscriber. Output goes to stderr because stdout
//! carries the purchase view and JSON dumps.
//!
//! The purchase view already shows every step, so by default the library
//! only logs warnings. Each `-v` opens it up one level:
//!
//! | Flag    | conduit_buyer | conduit_checkout |
//! |---------|---------------|------------------|
//! | (none)  | info          | warn             |
//! | `-v`    | info          | info             |
//! | `-vv`   | debug         | debug            |
//! | `-vvv`  | trace         | trace            |

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output for a terminal.
    #[default]
    Pretty,
    /// JSON lines, for log shippers.
    Json,
}

/// Filter directives for a `-v` count.
pub fn filter_for(verbosity: u8) -> String {
    let (buyer, checkout) = match verbosity {
        0 => ("info", "warn"),
        1 => ("info", "info"),
        2 => ("debug", "debug"),
        _ => ("trace", "trace"),
    };
    format!("conduit_buyer={},conduit_checkout={}", buyer, checkout)
}

/// Install the global subscriber. Call once, early in `main()`.
///
/// `RUST_LOG` overrides `default_filter` when set, e.g.
///
/// ```text
/// RUST_LOG=conduit_checkout=trace,conduit_buyer=debug
/// ```
pub fn init_logging(default_filter: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            )
            .init(),
    }

    tracing::debug!(?format, filter = default_filter, "logging initialized");
}
