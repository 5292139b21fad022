//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; hosts that do not bring
//! their own subscriber can install the default fmt one here.

use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "session_guard=info";

/// Install a global fmt subscriber, ignoring an already-installed one.
pub fn init_tracing(default_filter: &str) {
    if try_init_tracing(default_filter).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the filter is invalid or a global subscriber
/// is already set.
pub fn try_init_tracing(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| Error::Config(format!("invalid log filter '{default_filter}': {e}")))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing init failed: {e}")))
}
