//! Listener and HTTP connection manager construction.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, config_source::ConfigSourceSpecifier, socket_address,
    Address, AggregatedConfigSource, ConfigSource, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{filter, Filter, FilterChain, Listener as EnvoyListener};
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    HttpConnectionManager, HttpFilter, Rds,
};

use crate::config::ListenerDefaults;
use crate::domain::Listener;
use crate::errors::{Error, Result};
use crate::xds::filters::any_from_message;

pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

/// Name of the route configuration generated for `listener`.
pub fn route_config_name(listener: &Listener, defaults: &ListenerDefaults) -> String {
    format!("{}{}", listener.name, defaults.route_config_suffix)
}

/// HCM fetching its routes over ADS. Without virtual hosts an empty inline
/// configuration is used instead so the listener never waits on RDS.
pub fn http_connection_manager(
    listener: &Listener,
    defaults: &ListenerDefaults,
    http_filters: Vec<HttpFilter>,
) -> HttpConnectionManager {
    let name = route_config_name(listener, defaults);
    let route_specifier = if listener.http.virtual_hosts.is_empty() {
        RouteSpecifier::RouteConfig(RouteConfiguration { name, ..Default::default() })
    } else {
        RouteSpecifier::Rds(Rds {
            route_config_name: name,
            config_source: Some(ConfigSource {
                config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                    AggregatedConfigSource::default(),
                )),
                ..Default::default()
            }),
        })
    };

    HttpConnectionManager {
        codec_type: CodecType::Auto as i32,
        stat_prefix: defaults.stat_prefix.clone(),
        route_specifier: Some(route_specifier),
        http_filters,
        ..Default::default()
    }
}

pub fn build_listener(
    listener: &Listener,
    defaults: &ListenerDefaults,
    http_filters: Vec<HttpFilter>,
) -> Result<EnvoyListener> {
    if listener.name.trim().is_empty() {
        return Err(Error::validation_field("listener name cannot be empty", "name"));
    }
    if listener.bind_port == 0 || listener.bind_port > u32::from(u16::MAX) {
        return Err(Error::validation_field(
            format!("listener port {} is outside 1-65535", listener.bind_port),
            "bind_port",
        ));
    }

    let socket_address = SocketAddress {
        address: listener.bind_address.clone(),
        port_specifier: Some(socket_address::PortSpecifier::PortValue(listener.bind_port)),
        ..Default::default()
    };

    let hcm = http_connection_manager(listener, defaults, http_filters);
    let filter_chain = FilterChain {
        filters: vec![Filter {
            name: HCM_FILTER_NAME.to_string(),
            config_type: Some(filter::ConfigType::TypedConfig(any_from_message(HCM_TYPE_URL, &hcm))),
        }],
        ..Default::default()
    };

    Ok(EnvoyListener {
        name: listener.name.clone(),
        address: Some(Address { address: Some(AddressType::SocketAddress(socket_address)) }),
        filter_chains: vec![filter_chain],
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VirtualHost;
    use crate::xds::filters::decode_typed_config;
    use crate::xds::filters::http::{router_filter, ROUTER_FILTER_NAME};

    fn hcm_of(listener: &EnvoyListener) -> HttpConnectionManager {
        let Some(filter::ConfigType::TypedConfig(any)) =
            listener.filter_chains[0].filters[0].config_type.clone()
        else {
            panic!("expected typed HCM config");
        };
        decode_typed_config(&any, HCM_TYPE_URL).expect("decode HCM")
    }

    #[test]
    fn test_listener_uses_rds_over_ads() {
        let mut listener = Listener::new("http", 8080);
        listener.http.virtual_hosts.push(VirtualHost { name: "vh".into(), ..Default::default() });

        let built = build_listener(&listener, &ListenerDefaults::default(), vec![router_filter()])
            .expect("listener");
        assert_eq!(built.name, "http");

        let Some(AddressType::SocketAddress(address)) = built.address.clone().and_then(|a| a.address) else {
            panic!("expected socket address");
        };
        assert_eq!(address.address, "::");
        assert_eq!(address.port_specifier, Some(socket_address::PortSpecifier::PortValue(8080)));

        let hcm = hcm_of(&built);
        assert_eq!(hcm.stat_prefix, "http");
        assert_eq!(hcm.http_filters.last().map(|f| f.name.as_str()), Some(ROUTER_FILTER_NAME));
        let Some(RouteSpecifier::Rds(rds)) = hcm.route_specifier else {
            panic!("expected RDS");
        };
        assert_eq!(rds.route_config_name, "http-routes");
    }

    #[test]
    fn listener_without_virtual_hosts_gets_inline_routes() {
        let listener = Listener::new("empty", 8081);
        let built = build_listener(&listener, &ListenerDefaults::default(), vec![]).expect("listener");

        assert!(matches!(hcm_of(&built).route_specifier, Some(RouteSpecifier::RouteConfig(_))));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = build_listener(&Listener::new("http", 70000), &ListenerDefaults::default(), vec![])
            .expect_err("port out of range");
        assert!(format!("{err}").contains("outside 1-65535"));
        assert!(err.is_config_error());
    }
}
