//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber. The configured level is the default
//! filter; `RUST_LOG` overrides it when set.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global subscriber described by `config`.
///
/// Calling this more than once is harmless: later calls leave the first subscriber in place
/// and return `Ok(())`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.as_str().to_ascii_lowercase()))
        .map_err(|e| ProtocolError::ConfigError(format!("Invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if installed.is_ok() {
        tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    }

    Ok(())
}
