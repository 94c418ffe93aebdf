//! Logging infrastructure
//!
//! All log output goes to stderr: stdout is reserved for JSON-RPC frames.

use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Initialize the logging system.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `level`.
/// Safe to call more than once; later calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .try_init();

    tracing::debug!(level, "Logging initialized");
}

/// Initialize logging for tests (captured per-test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}
