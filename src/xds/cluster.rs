//! Base cluster builder
//!
//! Converts an [`Upstream`] into an Envoy `Cluster` before any plugin runs.
//! Plugins then edit the result through `UpstreamPlugin`.

use std::collections::HashMap;
use std::net::IpAddr;

use envoy_types::pb::envoy::config::cluster::v3::cluster::{ClusterDiscoveryType, DiscoveryType, LbPolicy};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{
    health_check::{
        self, custom_health_check, payload, CustomHealthCheck, GrpcHealthCheck, HttpHealthCheck,
        Payload, TcpHealthCheck,
    },
    socket_address::{self, Protocol},
    Address, HealthCheck as ProtoHealthCheck, Http2ProtocolOptions, RequestMethod, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::explicit_http_config::ProtocolConfig;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::{
    http_protocol_options::{ExplicitHttpConfig, UpstreamProtocolOptions},
    HttpProtocolOptions as UpstreamHttpProtocolOptionsV3,
};
use envoy_types::pb::envoy::r#type::v3::Int64Range;
use envoy_types::pb::google::protobuf::{Any, Duration, UInt32Value};
use tracing::debug;

use crate::domain::{DurationSpec, HealthCheck, HealthChecker, Host, Upstream};
use crate::errors::{Error, Result};
use crate::xds::filters::{any_from_message, typed_extension_config_from, TypedConfig};

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";

const DEFAULT_CONNECT_TIMEOUT_SECONDS: i64 = 5;
const DEFAULT_HEALTH_TIMEOUT_SECONDS: i64 = 5;
const DEFAULT_HEALTH_INTERVAL_SECONDS: i64 = 10;

/// Build the plugin-free cluster for `upstream`.
pub fn build_cluster(upstream: &Upstream) -> Result<Cluster> {
    let name = upstream.cluster_name();
    if upstream.hosts.is_empty() {
        return Err(Error::config(format!("upstream '{}' has no hosts", upstream.reference())));
    }

    let mut lb_endpoints = Vec::with_capacity(upstream.hosts.len());
    let mut has_hostname = false;
    for host in &upstream.hosts {
        if host.address.parse::<IpAddr>().is_err() {
            has_hostname = true;
        }
        lb_endpoints.push(lb_endpoint_for(host)?);
    }

    let endpoint_count = lb_endpoints.len();
    let mut cluster = Cluster {
        name: name.clone(),
        connect_timeout: Some(
            upstream
                .connect_timeout
                .map(DurationSpec::to_proto)
                .unwrap_or_else(|| seconds_to_duration(DEFAULT_CONNECT_TIMEOUT_SECONDS)),
        ),
        lb_policy: LbPolicy::RoundRobin as i32,
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: name.clone(),
            endpoints: vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }],
            ..Default::default()
        }),
        ..Default::default()
    };

    cluster.cluster_discovery_type = Some(if !has_hostname {
        ClusterDiscoveryType::Type(DiscoveryType::Static as i32)
    } else if endpoint_count <= 1 {
        ClusterDiscoveryType::Type(DiscoveryType::LogicalDns as i32)
    } else {
        ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32)
    });

    cluster.health_checks = upstream
        .health_checks
        .iter()
        .map(|check| build_health_check(&name, check))
        .collect::<Result<Vec<_>>>()?;

    if upstream.use_http2 {
        cluster.typed_extension_protocol_options = http2_protocol_options();
        debug!(cluster = %name, "Configured HTTP/2 protocol options for cluster");
    }

    Ok(cluster)
}

fn lb_endpoint_for(host: &Host) -> Result<LbEndpoint> {
    if host.address.trim().is_empty() {
        return Err(Error::validation_field("host address cannot be empty", "hosts.address"));
    }
    if !(1..=65535).contains(&host.port) {
        return Err(Error::validation_field(
            format!("port {} of host '{}' must be between 1 and 65535", host.port, host.address),
            "hosts.port",
        ));
    }

    Ok(LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(Address {
                address: Some(envoy_types::pb::envoy::config::core::v3::address::Address::SocketAddress(
                    SocketAddress {
                        address: host.address.clone(),
                        port_specifier: Some(socket_address::PortSpecifier::PortValue(host.port)),
                        protocol: Protocol::Tcp as i32,
                        ..Default::default()
                    },
                )),
            }),
            ..Default::default()
        })),
        ..Default::default()
    })
}

fn build_health_check(cluster: &str, check: &HealthCheck) -> Result<ProtoHealthCheck> {
    let health_checker = match &check.checker {
        HealthChecker::Http(spec) => {
            let mut http_check = HttpHealthCheck {
                host: spec.host.clone().unwrap_or_default(),
                path: spec.path.clone(),
                expected_statuses: spec
                    .expected_statuses
                    .iter()
                    .map(|code| Int64Range { start: *code as i64, end: (*code as i64) + 1 })
                    .collect(),
                ..Default::default()
            };
            if let Some(method) = spec.method.as_deref() {
                http_check.method = request_method_from_str(method)? as i32;
            }
            health_check::HealthChecker::HttpHealthCheck(http_check)
        }
        HealthChecker::Tcp { send, receive } => health_check::HealthChecker::TcpHealthCheck(TcpHealthCheck {
            send: send.as_ref().map(|text| text_payload(text)),
            receive: receive.iter().map(|text| text_payload(text)).collect(),
            ..Default::default()
        }),
        HealthChecker::Grpc { service_name, authority } => {
            health_check::HealthChecker::GrpcHealthCheck(GrpcHealthCheck {
                service_name: service_name.clone(),
                authority: authority.clone(),
                ..Default::default()
            })
        }
        HealthChecker::Custom { name, type_url, value } => {
            let typed = TypedConfig { type_url: type_url.clone(), value: value.clone() };
            let extension = typed_extension_config_from(name.clone(), &typed).map_err(|err| {
                Error::config_with_source(
                    format!("custom health checker '{}' on cluster '{}' is invalid", name, cluster),
                    Box::new(err),
                )
            })?;
            health_check::HealthChecker::CustomHealthCheck(CustomHealthCheck {
                name: extension.name,
                config_type: extension.typed_config.map(custom_health_check::ConfigType::TypedConfig),
            })
        }
    };

    Ok(ProtoHealthCheck {
        timeout: Some(check.timeout.map(DurationSpec::to_proto).unwrap_or_else(|| {
            seconds_to_duration(DEFAULT_HEALTH_TIMEOUT_SECONDS)
        })),
        interval: Some(check.interval.map(DurationSpec::to_proto).unwrap_or_else(|| {
            seconds_to_duration(DEFAULT_HEALTH_INTERVAL_SECONDS)
        })),
        healthy_threshold: Some(uint32(check.healthy_threshold.unwrap_or(1))),
        unhealthy_threshold: Some(uint32(check.unhealthy_threshold.unwrap_or(1))),
        health_checker: Some(health_checker),
        ..Default::default()
    })
}

fn text_payload(text: &str) -> Payload {
    Payload { payload: Some(payload::Payload::Text(text.to_string())) }
}

fn request_method_from_str(method: &str) -> Result<RequestMethod> {
    match method.to_uppercase().as_str() {
        "GET" => Ok(RequestMethod::Get),
        "HEAD" => Ok(RequestMethod::Head),
        "POST" => Ok(RequestMethod::Post),
        "PUT" => Ok(RequestMethod::Put),
        "DELETE" => Ok(RequestMethod::Delete),
        "OPTIONS" => Ok(RequestMethod::Options),
        "TRACE" => Ok(RequestMethod::Trace),
        "PATCH" => Ok(RequestMethod::Patch),
        "CONNECT" => Err(Error::validation_field(
            "method CONNECT is not allowed on http health checkers",
            "health_checks.method",
        )),
        other => Err(Error::validation_field(
            format!("unknown http health check method '{}'", other),
            "health_checks.method",
        )),
    }
}

/// `typed_extension_protocol_options` selecting HTTP/2 towards the hosts.
fn http2_protocol_options() -> HashMap<String, Any> {
    let http_protocol_options = UpstreamHttpProtocolOptionsV3 {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(ExplicitHttpConfig {
            protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(Http2ProtocolOptions::default())),
        })),
        ..Default::default()
    };

    let mut options = HashMap::new();
    options.insert(
        "envoy.extensions.upstreams.http.v3.HttpProtocolOptions".to_string(),
        any_from_message(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &http_protocol_options),
    );
    options
}

fn seconds_to_duration(seconds: i64) -> Duration {
    Duration { seconds, nanos: 0 }
}

fn uint32(value: u32) -> UInt32Value {
    UInt32Value { value }
}
