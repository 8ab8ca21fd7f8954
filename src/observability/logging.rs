//! # Structured Logging
//!
//! Subscriber setup and span macros for translation passes.

use crate::config::LoggingConfig;
use crate::errors::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Create a tracing span covering one translation pass.
///
/// ```rust,ignore
/// let span = translation_span!("gateway-proxy");
/// let span = translation_span!("gateway-proxy", generation = 7u64);
/// ```
#[macro_export]
macro_rules! translation_span {
    ($proxy:expr) => {
        tracing::info_span!(
            "translation_pass",
            proxy = %$proxy,
            pass_id = %uuid::Uuid::new_v4()
        )
    };
    ($proxy:expr, $($field:tt)*) => {
        tracing::info_span!(
            "translation_pass",
            proxy = %$proxy,
            pass_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a debug span around one plugin capability call
#[macro_export]
macro_rules! plugin_span {
    ($plugin:expr, $capability:expr, $resource:expr) => {
        tracing::debug_span!(
            "plugin_call",
            plugin = %$plugin,
            capability = %$capability,
            resource = %$resource
        )
    };
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this when a
/// subscriber is already installed leaves the existing one in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|err| {
            Error::config_with_source(format!("invalid log level '{}'", config.level), Box::new(err))
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json { builder.json().try_init() } else { builder.try_init() };

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already installed; keeping it");
    }

    Ok(())
}
