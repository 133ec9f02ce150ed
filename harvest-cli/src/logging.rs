//! Log output for the binary.
//!
//! Library crates emit through the `log` facade; the subscriber installed
//! here forwards those records alongside `tracing` events.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter applied when `RUST_LOG` is unset or unparsable.
pub(crate) const DEFAULT_FILTER: &str = "info";

/// Install a timestamped, levelled formatter writing to standard error.
///
/// Verbosity follows `RUST_LOG`, falling back to `info`.
///
/// # Errors
///
/// Returns [`TryInitError`] when a global subscriber or logger is already
/// installed.
pub fn init_logging() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
