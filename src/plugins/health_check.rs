//! Health-check augmentation plugin
//!
//! Envoy's built-in HTTP health checker can only look at status codes.
//! HTTP checks that carry response assertions are rewritten into a custom
//! checker whose payload embeds the original `HttpHealthCheck` together with
//! the assertions. Every other check is left exactly as the base cluster
//! builder produced it.

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::health_check::{
    custom_health_check, CustomHealthCheck, HealthChecker as ProtoHealthChecker, HttpHealthCheck,
};
use regex::Regex;
use tracing::debug;

use super::{InitParams, Params, Plugin, UpstreamPlugin};
use crate::domain::{
    HealthChecker, HealthState, ResponseAssertions, ResponseMatch, ResponseMatcher, Upstream,
};
use crate::errors::{Error, Result};
use crate::xds::filters::any_from_message;

pub const ADVANCED_HTTP_NAME: &str = "gateplane.health_checkers.advanced_http";
pub const ADVANCED_HTTP_TYPE_URL: &str =
    "type.googleapis.com/gateplane.health_checkers.advanced_http.v1.AdvancedHttp";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HealthCheckResult {
    Healthy = 0,
    Degraded = 1,
    Unhealthy = 2,
}

impl From<HealthState> for HealthCheckResult {
    fn from(state: HealthState) -> Self {
        match state {
            HealthState::Healthy => HealthCheckResult::Healthy,
            HealthState::Degraded => HealthCheckResult::Degraded,
            HealthState::Unhealthy => HealthCheckResult::Unhealthy,
        }
    }
}

/// Payload of the custom checker.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AdvancedHttp {
    #[prost(message, optional, tag = "1")]
    pub http_health_check: Option<HttpHealthCheck>,
    #[prost(message, optional, tag = "2")]
    pub response_assertions: Option<ResponseAssertionsProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseAssertionsProto {
    #[prost(message, repeated, tag = "1")]
    pub response_matchers: Vec<ResponseMatcherProto>,
    #[prost(enumeration = "HealthCheckResult", tag = "2")]
    pub no_match_health: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseMatcherProto {
    #[prost(message, optional, tag = "1")]
    pub response_match: Option<ResponseMatchProto>,
    #[prost(enumeration = "HealthCheckResult", tag = "2")]
    pub match_health: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseMatchProto {
    #[prost(string, repeated, tag = "1")]
    pub json_key: Vec<String>,
    #[prost(bool, tag = "2")]
    pub ignore_error_on_parse: bool,
    #[prost(string, tag = "3")]
    pub regex: String,
}

#[derive(Debug, Default)]
pub struct HealthCheckPlugin;

impl Plugin for HealthCheckPlugin {
    fn name(&self) -> &'static str {
        "health_check"
    }

    fn init(&mut self, _params: &InitParams<'_>) -> Result<()> {
        Ok(())
    }

    fn as_upstream(&mut self) -> Option<&mut dyn UpstreamPlugin> {
        Some(self)
    }
}

impl UpstreamPlugin for HealthCheckPlugin {
    fn process_upstream(
        &mut self,
        _params: &mut Params<'_>,
        upstream: &Upstream,
        cluster: &mut Cluster,
    ) -> Result<()> {
        for (index, check) in upstream.health_checks.iter().enumerate() {
            let HealthChecker::Http(spec) = &check.checker else {
                continue;
            };
            let Some(assertions) = &spec.response_assertions else {
                continue;
            };

            let output = cluster.health_checks.get_mut(index).ok_or_else(|| {
                Error::internal(format!("cluster '{}' has no health check at index {}", cluster.name, index))
            })?;
            let http = match &output.health_checker {
                Some(ProtoHealthChecker::HttpHealthCheck(http)) => http.clone(),
                _ => {
                    return Err(Error::internal(format!(
                        "health check {} of cluster '{}' is not an HTTP check",
                        index, cluster.name
                    )))
                }
            };

            let payload = AdvancedHttp {
                http_health_check: Some(http),
                response_assertions: Some(response_assertions(assertions)?),
            };
            output.health_checker = Some(ProtoHealthChecker::CustomHealthCheck(CustomHealthCheck {
                name: ADVANCED_HTTP_NAME.to_string(),
                config_type: Some(custom_health_check::ConfigType::TypedConfig(any_from_message(
                    ADVANCED_HTTP_TYPE_URL,
                    &payload,
                ))),
            }));
            debug!(upstream = %upstream.reference(), index, "Rewrote HTTP health check with response assertions");
        }
        Ok(())
    }
}

fn response_assertions(assertions: &ResponseAssertions) -> Result<ResponseAssertionsProto> {
    let response_matchers = assertions
        .response_matchers
        .iter()
        .map(|matcher| {
            compile(&matcher.response_match.regex)?;
            Ok(ResponseMatcherProto {
                response_match: Some(ResponseMatchProto {
                    json_key: matcher.response_match.json_key.clone(),
                    ignore_error_on_parse: matcher.response_match.ignore_error_on_parse,
                    regex: matcher.response_match.regex.clone(),
                }),
                match_health: HealthCheckResult::from(match_health(matcher)) as i32,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ResponseAssertionsProto {
        response_matchers,
        no_match_health: HealthCheckResult::from(no_match_health(assertions)) as i32,
    })
}

fn match_health(matcher: &ResponseMatcher) -> HealthState {
    matcher.match_health.unwrap_or(HealthState::Healthy)
}

fn no_match_health(assertions: &ResponseAssertions) -> HealthState {
    assertions.no_match_health.unwrap_or(HealthState::Unhealthy)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| {
        Error::validation_field(
            format!("invalid response assertion regex '{}': {}", pattern, err),
            "response_assertions.response_matchers.regex",
        )
    })
}

/// Health implied by `body` under `assertions`: the first matching matcher
/// decides, otherwise the no-match health applies.
pub fn evaluate(assertions: &ResponseAssertions, body: &[u8]) -> Result<HealthState> {
    for matcher in &assertions.response_matchers {
        if response_matches(&matcher.response_match, body)? {
            return Ok(match_health(matcher));
        }
    }
    Ok(no_match_health(assertions))
}

fn response_matches(response_match: &ResponseMatch, body: &[u8]) -> Result<bool> {
    let regex = compile(&response_match.regex)?;
    if response_match.json_key.is_empty() {
        return Ok(regex.is_match(&String::from_utf8_lossy(body)));
    }

    let document: serde_json::Value = match serde_json::from_slice(body) {
        Ok(document) => document,
        Err(_) if response_match.ignore_error_on_parse => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    let mut value = &document;
    for key in &response_match.json_key {
        match value.get(key) {
            Some(next) => value = next,
            None => return Ok(false),
        }
    }

    Ok(match value {
        serde_json::Value::String(text) => regex.is_match(text),
        other => regex.is_match(&other.to_string()),
    })
}
