//! Logging bootstrap

use tracing_subscriber::EnvFilter;

use crate::{CacheError, CacheResult, LoggingConfig};

/// Install the global tracing subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this again once a
/// subscriber is installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> CacheResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| CacheError::Config(format!("Invalid log level '{}': {}", config.level, e)))?,
    };

    let result = match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        "text" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        other => {
            return Err(CacheError::Config(format!(
                "Unknown log format '{}', expected 'text' or 'json'",
                other
            )))
        }
    };

    // Already installed by an earlier call or by the host application
    if result.is_err() {
        tracing::debug!("Global subscriber already set, keeping it");
    }
    Ok(())
}
