//! # Configuration Management
//!
//! Loads [`TranslatorConfig`] from built-in defaults, an optional file and
//! `GATEPLANE__*` environment variables, in that order of precedence.

pub mod settings;

use std::path::Path;

use crate::Result;

pub use settings::{
    DuplicateFilterPolicy, FilterOrderingConfig, ListenerDefaults, LoggingConfig,
    TranslatorConfig,
};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "GATEPLANE";

impl TranslatorConfig {
    /// Load configuration, layering an optional file and the environment over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded: TranslatorConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        tracing::debug!(
            duplicate_policy = ?loaded.filters.duplicate_policy,
            stat_prefix = %loaded.listeners.stat_prefix,
            "Loaded translator configuration"
        );

        Ok(loaded)
    }
}
