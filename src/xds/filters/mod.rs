//! Extension config builder.
//!
//! Every plugin-produced policy reaches Envoy wrapped in a protobuf `Any`,
//! either inside a `TypedExtensionConfig` (filters, custom sinks, custom
//! health checkers) or directly in a `typed_per_filter_config` map keyed by
//! filter name. This module owns both envelopes.
//!
//! # Failure modes
//!
//! Encoding a well-known prost message cannot fail, so builders for those
//! payloads return the envelope directly. Payloads supplied by callers
//! (raw type URL plus bytes) go through [`TypedConfig::validate`] and
//! [`decode_typed_config`], which return recoverable validation errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateplane::xds::filters::typed_extension_config;
//!
//! let ext = typed_extension_config(
//!     "envoy.filters.http.csrf",
//!     CSRF_POLICY_TYPE_URL,
//!     &policy_proto,
//! );
//! ```

pub mod http;

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use envoy_types::pb::envoy::config::core::v3::TypedExtensionConfig;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use serde::{Deserialize, Serialize};

const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Wrapper for binary protobuf payloads serialized as base64 in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Base64Bytes(pub Vec<u8>);

impl Serialize for Base64Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded = BASE64_ENGINE.encode(&self.0);
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = BASE64_ENGINE
            .decode(encoded.as_bytes())
            .map_err(|err| serde::de::Error::custom(err.to_string()))?;
        Ok(Base64Bytes(decoded))
    }
}

/// JSON-friendly form of a `google.protobuf.Any` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedConfig {
    pub type_url: String,
    #[serde(default)]
    pub value: Base64Bytes,
}

impl TypedConfig {
    /// Creates a typed config from a prost message.
    pub fn from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Self {
        Self { type_url: type_url.into(), value: Base64Bytes(msg.encode_to_vec()) }
    }

    /// Check a caller supplied payload before it is attached to output.
    pub fn validate(&self) -> crate::Result<()> {
        let message = self.type_url.strip_prefix(TYPE_URL_PREFIX).ok_or_else(|| {
            crate::Error::validation_field(
                format!("type_url '{}' must start with '{}'", self.type_url, TYPE_URL_PREFIX),
                "type_url",
            )
        })?;

        if message.is_empty() || message.contains('/') {
            return Err(crate::Error::validation_field(
                format!("type_url '{}' does not name a message type", self.type_url),
                "type_url",
            ));
        }

        Ok(())
    }

    /// Converts to Envoy `Any` structure for xDS protocol.
    pub fn to_any(&self) -> Any {
        Any { type_url: self.type_url.clone(), value: self.value.0.clone() }
    }
}

/// Helper for building Envoy `Any` values from prost messages.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    TypedConfig::from_message(type_url, msg).to_any()
}

/// Wrap a prost message in the named `TypedExtensionConfig` envelope.
pub fn typed_extension_config<M: Message>(
    name: impl Into<String>,
    type_url: impl Into<String>,
    msg: &M,
) -> TypedExtensionConfig {
    TypedExtensionConfig { name: name.into(), typed_config: Some(any_from_message(type_url, msg)) }
}

/// Wrap a caller supplied payload, validating it first.
pub fn typed_extension_config_from(
    name: impl Into<String>,
    config: &TypedConfig,
) -> crate::Result<TypedExtensionConfig> {
    config.validate()?;
    Ok(TypedExtensionConfig { name: name.into(), typed_config: Some(config.to_any()) })
}

/// Decode an `Any` into `M`, checking the type URL.
pub fn decode_typed_config<M: Message + Default>(any: &Any, expected_type_url: &str) -> crate::Result<M> {
    if any.type_url != expected_type_url {
        return Err(crate::Error::validation_field(
            format!("expected type_url '{}', got '{}'", expected_type_url, any.type_url),
            "type_url",
        ));
    }

    M::decode(any.value.as_slice()).map_err(|err| {
        crate::Error::validation(format!("failed to decode '{}': {}", expected_type_url, err))
    })
}

/// Attach a per-filter override. A later write for the same filter replaces the earlier one.
pub fn set_per_filter_config(
    map: &mut HashMap<String, Any>,
    filter_name: impl Into<String>,
    config: Any,
) {
    map.insert(filter_name.into(), config);
}

/// Error helper for invalid filter configuration.
pub fn invalid_config(msg: impl Into<String>) -> crate::Error {
    crate::Error::config(msg.into())
}
