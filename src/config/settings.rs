//! # Configuration Settings
//!
//! Defines the configuration structure for the gateplane translator.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level translator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Filter chain ordering behavior
    #[validate(nested)]
    pub filters: FilterOrderingConfig,

    /// Defaults applied to every generated listener
    #[validate(nested)]
    pub listeners: ListenerDefaults,

    /// Logging configuration
    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl TranslatorConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        if self.listeners.route_config_suffix.trim() != self.listeners.route_config_suffix {
            return Err(Error::validation_field(
                "route_config_suffix cannot contain surrounding whitespace",
                "listeners.route_config_suffix",
            ));
        }

        Ok(())
    }
}

/// How the stage resolver treats two filters sharing a name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateFilterPolicy {
    /// The filter contributed later replaces the earlier one
    #[default]
    LastWriterWins,
    /// Colliding names abort the pass
    Reject,
}

/// Filter ordering configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
#[serde(default)]
pub struct FilterOrderingConfig {
    pub duplicate_policy: DuplicateFilterPolicy,
}

/// Listener generation defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct ListenerDefaults {
    /// Stat prefix of the generated HTTP connection manager
    #[validate(length(min = 1, message = "stat_prefix cannot be empty"))]
    pub stat_prefix: String,

    /// Appended to a listener name to form its route configuration name
    #[validate(length(min = 1, message = "route_config_suffix cannot be empty"))]
    pub route_config_suffix: String,
}

impl Default for ListenerDefaults {
    fn default() -> Self {
        Self { stat_prefix: "http".to_string(), route_config_suffix: "-routes".to_string() }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    #[validate(length(min = 1, message = "log level cannot be empty"))]
    pub level: String,

    /// Emit JSON formatted log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TranslatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.filters.duplicate_policy, DuplicateFilterPolicy::LastWriterWins);
        assert_eq!(config.listeners.stat_prefix, "http");
        assert_eq!(config.listeners.route_config_suffix, "-routes");
    }

    #[test]
    fn empty_stat_prefix_is_rejected() {
        let mut config = TranslatorConfig::default();
        config.listeners.stat_prefix = String::new();

        let err = config.validate().expect_err("empty stat prefix should fail");
        assert!(format!("{err}").contains("stat_prefix cannot be empty"));
    }

    #[test]
    fn padded_suffix_is_rejected() {
        let mut config = TranslatorConfig::default();
        config.listeners.route_config_suffix = " -routes".to_string();

        let err = config.validate().expect_err("padded suffix should fail");
        assert!(format!("{err}").contains("surrounding whitespace"));
    }

    #[test]
    fn duplicate_policy_deserializes_snake_case() {
        let config: TranslatorConfig =
            serde_json::from_str(r#"{"filters":{"duplicate_policy":"reject"}}"#)
                .expect("deserialize");
        assert_eq!(config.filters.duplicate_policy, DuplicateFilterPolicy::Reject);
        assert_eq!(config.logging, LoggingConfig::default());
    }
}
