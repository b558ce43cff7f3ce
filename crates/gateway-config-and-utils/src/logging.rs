//! Logging initialization for the gateway daemon.
//!
//! Structured tracing output to stderr. The filter comes from `RUST_LOG`
//! when set, otherwise from the level passed in (the binary's `--log-level`
//! flag).

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for the daemon.
///
/// Safe to call once per process; later calls are ignored so tests that
/// initialize logging do not panic.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
