//! Logging and tracing setup
//!
//! Provides structured logging configuration using tracing. The gateway
//! logs to stdout by default; when a logfile is configured the output goes
//! through a non-blocking appender instead, with optional daily rotation.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging to stdout
///
/// Reads the log level from the RUST_LOG env var, defaulting to info.
/// Examples:
///   RUST_LOG=debug            -> debug and higher
///   RUST_LOG=mistral=trace    -> trace for mistral crates only
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}

/// Initialize tracing with logfile output
///
/// `rotate` selects daily rolling; otherwise a single logfile is appended
/// to for the lifetime of the process. The returned guard must be held by
/// the caller until exit so buffered lines are flushed.
pub fn init_tracing_to_file(dir: &Path, file: &str, rotate: bool) -> WorkerGuard {
    let appender = if rotate {
        rolling::daily(dir, file)
    } else {
        rolling::never(dir, file)
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(writer)
                .compact(),
        )
        .init();

    guard
}
