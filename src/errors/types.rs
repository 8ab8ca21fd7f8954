//! # Error Types
//!
//! Error types for the gateplane translator using `thiserror`.

use std::fmt;

/// Custom result type for gateplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of source or generated resource an error is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Upstream,
    Listener,
    VirtualHost,
    Route,
    WeightedDestination,
    Cluster,
    RouteConfiguration,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::Upstream => "upstream",
            ResourceKind::Listener => "listener",
            ResourceKind::VirtualHost => "virtual host",
            ResourceKind::Route => "route",
            ResourceKind::WeightedDestination => "weighted destination",
            ResourceKind::Cluster => "cluster",
            ResourceKind::RouteConfiguration => "route configuration",
        };
        f.write_str(label)
    }
}

/// Kind plus identity of the resource a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Main error type for the gateplane translator
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors: missing references, exclusive fields, out of range values
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors for caller supplied values
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Lookup failures against the current snapshot
    #[error("Resource not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A plugin capability failed for a single resource
    #[error("plugin '{plugin}' failed in {capability} for {resource}: {source}")]
    Plugin {
        plugin: String,
        capability: String,
        resource: ResourceIdentity,
        #[source]
        source: Box<Error>,
    },

    /// A resource failed outside plugin dispatch (base conversion)
    #[error("{resource}: {source}")]
    Resource {
        resource: ResourceIdentity,
        #[source]
        source: Box<Error>,
    },

    /// A translation pass aborted in a shared phase
    #[error("translation pass failed during {phase}: {source}")]
    Pass {
        phase: String,
        #[source]
        source: Box<Error>,
    },

    /// Fingerprinting could not serialize a resource
    #[error("Fingerprint error for {resource}: {message}")]
    Fingerprint { resource: String, message: String },

    /// One or more independent resources failed during a pass
    #[error("{} resource(s) failed translation: {}", errors.len(), join_errors(errors))]
    Aggregate { errors: Vec<Error> },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn join_errors(errors: &[Error]) -> String {
    errors.iter().map(|err| err.to_string()).collect::<Vec<_>>().join("; ")
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(context: S) -> Self {
        Self::Serialization { context: context.into(), source: None }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Wrap an error raised by a plugin capability
    pub fn plugin(
        plugin: impl Into<String>,
        capability: impl fmt::Display,
        resource: ResourceIdentity,
        source: Error,
    ) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            capability: capability.to_string(),
            resource,
            source: Box::new(source),
        }
    }

    /// Attach resource identity to an error raised outside plugin dispatch
    pub fn resource(resource: ResourceIdentity, source: Error) -> Self {
        Self::Resource { resource, source: Box::new(source) }
    }

    /// Wrap an error that aborted a pass-level phase
    pub fn pass(phase: impl fmt::Display, source: Error) -> Self {
        Self::Pass { phase: phase.to_string(), source: Box::new(source) }
    }

    /// Unwrap plugin/resource/pass context down to the originating error
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Plugin { source, .. }
            | Error::Resource { source, .. }
            | Error::Pass { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True for the configuration class of the error taxonomy
    pub fn is_config_error(&self) -> bool {
        matches!(self.root_cause(), Error::Config { .. } | Error::Validation { .. })
    }

    /// True when a referenced resource was missing from the snapshot
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self.root_cause(), Error::NotFound { .. })
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            context: "JSON serialization failed".to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Self::Serialization {
            context: "protobuf decoding failed".to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect();
        fields.sort();

        Self::validation(format!("Validation failed: {}", fields.join("; ")))
    }
}
