//! HTTP filter builders
//!
//! Converts ordered filters into `HttpFilter` messages for the HTTP
//! connection manager and supplies the terminal router filter.

use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType as HttpFilterConfigType;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any;

use crate::plugins::stage::StagedFilter;
use crate::xds::filters::{any_from_message, invalid_config};

/// Envoy's canonical router filter name
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
pub const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

/// Build an `HttpFilter` carrying `config` as its typed config.
pub fn http_filter(name: impl Into<String>, config: Any) -> HttpFilter {
    HttpFilter {
        name: name.into(),
        config_type: Some(HttpFilterConfigType::TypedConfig(config)),
        ..Default::default()
    }
}

pub fn router_filter() -> HttpFilter {
    http_filter(ROUTER_FILTER_NAME, any_from_message(ROUTER_TYPE_URL, &RouterFilter::default()))
}

/// Convert already ordered filters into the HCM chain, router last.
pub fn build_http_filters(ordered: &[StagedFilter]) -> crate::Result<Vec<HttpFilter>> {
    let mut filters = Vec::with_capacity(ordered.len() + 1);

    for staged in ordered {
        if staged.name == ROUTER_FILTER_NAME {
            return Err(invalid_config(format!(
                "plugins may not contribute '{}'; it is appended automatically",
                ROUTER_FILTER_NAME
            )));
        }
        filters.push(http_filter(staged.name.clone(), staged.typed_config.clone()));
    }

    filters.push(router_filter());
    Ok(filters)
}
