//! Diagnostic logging setup.
//!
//! Logs go to stderr so `--format json` output on stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive, e.g. `DOCSOR_LOG=docsor=debug`.
pub const LOG_ENV: &str = "DOCSOR_LOG";
const DEFAULT_FILTER: &str = "warn";

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
