//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns an
/// error if a subscriber is already installed; callers that may run more
/// than once (tests) can ignore it.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| crate::config_err!("Invalid log level '{}': {}", config.level, e))?;

    let installed = if config.json {
        // JSON format for production/container environments
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .try_init()
    };

    installed.map_err(|e| Error::Internal(format!("Logging already initialized: {}", e)))
}
