//! Upstream (backend) definitions and their health checks.

use serde::{Deserialize, Serialize};

use super::metadata::{DurationSpec, Metadata, ResourceRef};

/// An addressable destination service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Upstream {
    pub metadata: Metadata,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub connect_timeout: Option<DurationSpec>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
    /// Speak HTTP/2 to the hosts (required for gRPC backends)
    #[serde(default)]
    pub use_http2: bool,
}

impl Upstream {
    pub fn reference(&self) -> ResourceRef {
        self.metadata.reference()
    }

    pub fn cluster_name(&self) -> String {
        self.reference().cluster_name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub address: String,
    pub port: u32,
}

impl Host {
    pub fn new(address: impl Into<String>, port: u32) -> Self {
        Self { address: address.into(), port }
    }
}

/// Active health check attached to an upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub timeout: Option<DurationSpec>,
    #[serde(default)]
    pub interval: Option<DurationSpec>,
    #[serde(default)]
    pub healthy_threshold: Option<u32>,
    #[serde(default)]
    pub unhealthy_threshold: Option<u32>,
    pub checker: HealthChecker,
}

impl HealthCheck {
    /// HTTP check against `path` with default timing.
    pub fn http(path: impl Into<String>) -> Self {
        Self {
            timeout: None,
            interval: None,
            healthy_threshold: None,
            unhealthy_threshold: None,
            checker: HealthChecker::Http(HttpHealthCheckSpec {
                path: path.into(),
                ..Default::default()
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthChecker {
    Http(HttpHealthCheckSpec),
    Tcp {
        #[serde(default)]
        send: Option<String>,
        #[serde(default)]
        receive: Vec<String>,
    },
    Grpc {
        #[serde(default)]
        service_name: String,
        #[serde(default)]
        authority: String,
    },
    /// Already-serialized custom checker passed through as given
    Custom { name: String, type_url: String, value: crate::xds::filters::Base64Bytes },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpHealthCheckSpec {
    pub path: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub expected_statuses: Vec<u16>,
    /// Body assertions the built-in checker cannot express
    #[serde(default)]
    pub response_assertions: Option<ResponseAssertions>,
}

/// Health derived from matching a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseAssertions {
    #[serde(default)]
    pub response_matchers: Vec<ResponseMatcher>,
    /// Applied when no matcher matched; unhealthy when unset
    #[serde(default)]
    pub no_match_health: Option<HealthState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMatcher {
    pub response_match: ResponseMatch,
    /// Applied when the matcher matched; healthy when unset
    #[serde(default)]
    pub match_health: Option<HealthState>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseMatch {
    /// Path into a JSON body; the raw body is matched when absent
    #[serde(default)]
    pub json_key: Vec<String>,
    #[serde(default)]
    pub ignore_error_on_parse: bool,
    pub regex: String,
}
