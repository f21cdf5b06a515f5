//! Tracing setup for the daemon and CLI.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// The tracing level this verbosity maps to.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. `RUST_LOG` overrides the verbosity-derived
/// filter; a kiosk deployment runs quiet and flips it on for diagnosis.
pub fn init_logging(verbosity: Verbosity) {
    let default_filter = format!("labsync={}", verbosity.level());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Already-installed subscriber is fine, keep the first one
    let _ = subscriber.try_init();
}
