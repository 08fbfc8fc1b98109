//! Diagnostic tracing for the agent binaries.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Progress frames
//! meant for the user are a separate channel (see `io::progress`) and are
//! unaffected by the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_filter` when it is unset.
///
/// # Example
/// ```bash
/// RUST_LOG=agent=debug agent run "list files"
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
