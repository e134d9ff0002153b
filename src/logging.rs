//! Structured logging setup (`tracing` + `tracing-subscriber`)

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies
/// (e.g. `"info"` or `"edge_tune=debug"`). Worker thread names are included
/// so interleaved trials can be told apart.
///
/// # Errors
///
/// Returns `Error::Other` if the filter is invalid or a subscriber is
/// already installed.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| Error::Other(format!("Invalid log filter '{default_filter}': {e}")))?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_thread_names(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to initialize logger: {e}")))
}
