//! Subscriber setup for the relay's `tracing` output.

use crate::config::LoggingConfig;
use crate::error::{RelayError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()));

    let installed = if config.json_format {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };

    installed.map_err(|e| RelayError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::debug!(app = %config.app_name, "logging initialised");
    Ok(())
}
