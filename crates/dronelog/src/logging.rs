//! Tracing setup for the `dronelog` binary.
//!
//! Queue writes, settings changes, wind lookups and sync results are all
//! reported as `tracing` events. Command results go to stdout; these events
//! go to stderr so scripts can parse one without the other.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// HTTP stack targets that stay at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

/// How much the logbook reports while it works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Queued records and sync outcomes.
    #[default]
    Normal,
    /// Adds per-request and storage detail (`-v`).
    Verbose,
    /// Everything, including HTTP client internals (`-vv`).
    Trace,
}

impl Verbosity {
    /// Derive the verbosity from `--quiet` and repeated `-v` flags.
    ///
    /// `--quiet` wins over any number of `-v`.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The most detailed level emitted for `dronelog` events.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// The `EnvFilter` directive used when `RUST_LOG` is unset.
    ///
    /// Below [`Verbosity::Trace`] the HTTP stack is held at `warn`.
    #[must_use]
    pub fn directive(self) -> String {
        let mut directive = format!("dronelog={}", self.level());
        if self != Self::Trace {
            for target in QUIET_TARGETS {
                directive.push_str(&format!(",{target}=warn"));
            }
        }
        directive
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG`, when set and valid, replaces [`Verbosity::directive`]. Calling
/// this more than once keeps the first subscriber.
///
/// ```no_run
/// use dronelog::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(false, 1));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}
