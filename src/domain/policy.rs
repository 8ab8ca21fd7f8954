//! Extension policies attachable to listeners, virtual hosts, routes and
//! weighted destinations.

use serde::{Deserialize, Serialize};

use super::metadata::{DurationSpec, ResourceRef, RuntimeFraction, StringMatch};
use crate::plugins::stage::FilterStage;

/// External processing settings, used globally and per listener.
///
/// Every field is optional so a listener may override any subset of the
/// global settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtProcSettings {
    pub grpc_service: Option<ExtProcGrpcService>,
    pub filter_stage: Option<FilterStage>,
    pub failure_mode_allow: Option<bool>,
    pub processing_mode: Option<ProcessingMode>,
    pub request_attributes: Vec<String>,
    pub response_attributes: Vec<String>,
    pub message_timeout: Option<DurationSpec>,
    pub max_message_timeout: Option<DurationSpec>,
    pub stat_prefix: String,
    pub metadata_context_namespaces: Vec<String>,
    pub typed_metadata_context_namespaces: Vec<String>,
    // Accepted but not yet applied to generated config
    pub mutation_rules: Option<HeaderMutationRules>,
    pub disable_clear_route_cache: Option<bool>,
    pub forward_rules: Option<HeaderForwardingRules>,
    pub filter_metadata: Option<serde_json::Value>,
    pub allow_mode_override: Option<bool>,
}

/// gRPC service hosting the external processor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtProcGrpcService {
    pub ext_proc_server_ref: ResourceRef,
    pub authority: Option<String>,
    pub retry_policy: Option<GrpcRetryPolicy>,
    pub timeout: Option<DurationSpec>,
    pub initial_metadata: Vec<HeaderValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcRetryPolicy {
    pub retry_back_off: Option<RetryBackoff>,
    pub num_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoff {
    pub base_interval: Option<DurationSpec>,
    pub max_interval: Option<DurationSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValue {
    pub key: String,
    pub value: String,
}

impl HeaderValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Which parts of a request/response are sent to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingMode {
    pub request_header_mode: HeaderSendMode,
    pub response_header_mode: HeaderSendMode,
    pub request_body_mode: BodySendMode,
    pub response_body_mode: BodySendMode,
    pub request_trailer_mode: HeaderSendMode,
    pub response_trailer_mode: HeaderSendMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderSendMode {
    #[default]
    Default,
    Send,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BodySendMode {
    #[default]
    None,
    Streamed,
    Buffered,
    BufferedPartial,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderMutationRules {
    pub allow_all_routing: Option<bool>,
    pub allow_envoy: Option<bool>,
    pub disallow_system: Option<bool>,
    pub disallow_all: Option<bool>,
    pub allow_expression: Option<String>,
    pub disallow_expression: Option<String>,
    pub disallow_is_error: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderForwardingRules {
    pub allowed_headers: Vec<StringMatch>,
    pub disallowed_headers: Vec<StringMatch>,
}

/// Listener-level external processing: an explicit toggle or settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerExtProc {
    DisableExtProc(bool),
    ExtProc(ExtProcSettings),
}

/// Virtual host or route external processing override.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtProcRouteSettings {
    /// Only `true` is meaningful
    pub disabled: Option<bool>,
    pub overrides: Option<ExtProcOverrides>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtProcOverrides {
    pub processing_mode: Option<ProcessingMode>,
    pub request_attributes: Vec<String>,
    pub response_attributes: Vec<String>,
    pub grpc_service: Option<ExtProcGrpcService>,
}

/// Cross-site request forgery policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfPolicy {
    pub filter_enabled: Option<RuntimeFraction>,
    pub shadow_enabled: Option<RuntimeFraction>,
    pub additional_origins: Vec<StringMatch>,
}

/// Traffic tap configuration for a listener.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub sinks: Vec<TapSink>,
    pub max_buffered_rx_bytes: Option<u32>,
    pub max_buffered_tx_bytes: Option<u32>,
    pub record_headers_received_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapSink {
    Grpc { tap_server: ResourceRef },
    Http {
        tap_server: ResourceRef,
        #[serde(default)]
        timeout: Option<DurationSpec>,
    },
}
