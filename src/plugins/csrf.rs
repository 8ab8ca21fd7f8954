//! CSRF plugin
//!
//! Converts CSRF policies into Envoy's CSRF filter config. The filter is
//! added to a listener when the listener (or global settings) carries a
//! policy, or lazily when any route, virtual host or weighted destination
//! of that listener requested one earlier in the same pass. A request only
//! counts once the resource carrying it is kept in the output.

use std::collections::HashSet;

use envoy_types::pb::envoy::config::core::v3::RuntimeFractionalPercent;
use envoy_types::pb::envoy::config::route::v3::{
    weighted_cluster::ClusterWeight, Route as EnvoyRoute, VirtualHost as EnvoyVirtualHost,
};
use envoy_types::pb::envoy::extensions::filters::http::csrf::v3::CsrfPolicy as CsrfPolicyProto;
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};
use envoy_types::pb::envoy::r#type::v3::{fractional_percent::DenominatorType, FractionalPercent};
use tracing::debug;

use super::merge::shallow_merge;
use super::{
    FilterStage, HttpFilterPlugin, InitParams, Params, Plugin, RouteContext, RoutePlugin,
    StagedFilter, VirtualHostContext, VirtualHostPlugin, WeightedDestinationContext,
    WeightedDestinationPlugin, WellKnownStage,
};
use crate::domain::{
    CsrfPolicy, FractionDenominator, Listener, Route, RuntimeFraction, StringMatch, VirtualHost,
    WeightedDestination,
};
use crate::errors::{Error, Result};
use crate::xds::filters::{any_from_message, set_per_filter_config};

pub const FILTER_NAME: &str = "envoy.filters.http.csrf";
pub const CSRF_POLICY_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.csrf.v3.CsrfPolicy";
pub const FILTER_STAGE: FilterStage = FilterStage::after(WellKnownStage::Cors);

#[derive(Debug, Default)]
pub struct CsrfPlugin {
    global: Option<CsrfPolicy>,
    /// Listeners whose lower scopes asked for the filter during this pass
    requested_by: HashSet<String>,
    /// Requests from the virtual host or route still being processed
    pending: HashSet<String>,
}

impl Plugin for CsrfPlugin {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn init(&mut self, params: &InitParams<'_>) -> Result<()> {
        if let Some(policy) = &params.settings.csrf {
            csrf_policy(policy)?;
        }
        self.global = params.settings.csrf.clone();
        Ok(())
    }

    fn begin_pass(&mut self) {
        self.requested_by.clear();
        self.pending.clear();
    }

    fn settle(&mut self, kept: bool) {
        for listener in self.pending.drain() {
            if !kept {
                debug!(listener = %listener, "Discarding CSRF request from dropped resource");
                continue;
            }
            if self.requested_by.insert(listener.clone()) {
                debug!(listener = %listener, "CSRF filter requested by a nested scope");
            }
        }
    }

    fn as_http_filters(&mut self) -> Option<&mut dyn HttpFilterPlugin> {
        Some(self)
    }

    fn as_virtual_host(&mut self) -> Option<&mut dyn VirtualHostPlugin> {
        Some(self)
    }

    fn as_route(&mut self) -> Option<&mut dyn RoutePlugin> {
        Some(self)
    }

    fn as_weighted_destination(&mut self) -> Option<&mut dyn WeightedDestinationPlugin> {
        Some(self)
    }
}

impl CsrfPlugin {
    fn request(&mut self, listener: &Listener) {
        self.pending.insert(listener.name.clone());
    }
}

impl HttpFilterPlugin for CsrfPlugin {
    fn http_filters(&mut self, _params: &mut Params<'_>, listener: &Listener) -> Result<Vec<StagedFilter>> {
        let effective = shallow_merge(self.global.as_ref(), listener.http.options.csrf.as_ref());
        let config = match effective {
            Some(policy) => csrf_policy(&policy)?,
            None if self.requested_by.contains(&listener.name) => pass_through_policy(),
            None => return Ok(Vec::new()),
        };

        Ok(vec![StagedFilter::new(
            FILTER_NAME,
            any_from_message(CSRF_POLICY_TYPE_URL, &config),
            FILTER_STAGE,
        )])
    }
}

impl VirtualHostPlugin for CsrfPlugin {
    fn process_virtual_host(
        &mut self,
        _params: &mut Params<'_>,
        context: &VirtualHostContext<'_>,
        virtual_host: &VirtualHost,
        output: &mut EnvoyVirtualHost,
    ) -> Result<()> {
        let Some(policy) = &virtual_host.options.csrf else {
            return Ok(());
        };
        let config = csrf_policy(policy)?;
        set_per_filter_config(
            &mut output.typed_per_filter_config,
            FILTER_NAME,
            any_from_message(CSRF_POLICY_TYPE_URL, &config),
        );
        self.request(context.listener);
        Ok(())
    }
}

impl RoutePlugin for CsrfPlugin {
    fn process_route(
        &mut self,
        _params: &mut Params<'_>,
        context: &RouteContext<'_>,
        route: &Route,
        output: &mut EnvoyRoute,
    ) -> Result<()> {
        let Some(policy) = &route.options.csrf else {
            return Ok(());
        };
        let config = csrf_policy(policy)?;
        set_per_filter_config(
            &mut output.typed_per_filter_config,
            FILTER_NAME,
            any_from_message(CSRF_POLICY_TYPE_URL, &config),
        );
        self.request(context.listener);
        Ok(())
    }
}

impl WeightedDestinationPlugin for CsrfPlugin {
    fn process_weighted_destination(
        &mut self,
        _params: &mut Params<'_>,
        context: &WeightedDestinationContext<'_>,
        destination: &WeightedDestination,
        output: &mut ClusterWeight,
    ) -> Result<()> {
        let Some(policy) = &destination.options.csrf else {
            return Ok(());
        };
        let config = csrf_policy(policy)?;
        set_per_filter_config(
            &mut output.typed_per_filter_config,
            FILTER_NAME,
            any_from_message(CSRF_POLICY_TYPE_URL, &config),
        );
        self.request(context.listener);
        Ok(())
    }
}

/// Convert a policy. An unset `filter_enabled` enforces on every request.
pub fn csrf_policy(policy: &CsrfPolicy) -> Result<CsrfPolicyProto> {
    let additional_origins = policy
        .additional_origins
        .iter()
        .map(string_matcher)
        .collect::<Result<Vec<_>>>()?;

    Ok(CsrfPolicyProto {
        filter_enabled: Some(runtime_percent(
            policy.filter_enabled.as_ref().unwrap_or(&RuntimeFraction::percent(100)),
        )),
        shadow_enabled: policy.shadow_enabled.as_ref().map(runtime_percent),
        additional_origins,
    })
}

/// Listener config installed only so nested per-route policies take effect.
fn pass_through_policy() -> CsrfPolicyProto {
    CsrfPolicyProto {
        filter_enabled: Some(runtime_percent(&RuntimeFraction::percent(0))),
        shadow_enabled: None,
        additional_origins: Vec::new(),
    }
}

fn runtime_percent(fraction: &RuntimeFraction) -> RuntimeFractionalPercent {
    let denominator = match fraction.denominator {
        FractionDenominator::Hundred => DenominatorType::Hundred,
        FractionDenominator::TenThousand => DenominatorType::TenThousand,
        FractionDenominator::Million => DenominatorType::Million,
    };
    RuntimeFractionalPercent {
        default_value: Some(FractionalPercent {
            numerator: fraction.numerator,
            denominator: denominator as i32,
        }),
        runtime_key: fraction.runtime_key.clone().unwrap_or_default(),
    }
}

fn string_matcher(matcher: &StringMatch) -> Result<StringMatcher> {
    let pattern = match matcher {
        StringMatch::Exact(value) => MatchPattern::Exact(value.clone()),
        StringMatch::Prefix(value) => MatchPattern::Prefix(value.clone()),
        StringMatch::Suffix(value) => MatchPattern::Suffix(value.clone()),
        StringMatch::SafeRegex(pattern) => {
            regex::Regex::new(pattern).map_err(|err| {
                Error::validation_field(
                    format!("invalid origin regex '{}': {}", pattern, err),
                    "additional_origins",
                )
            })?;
            MatchPattern::SafeRegex(RegexMatcher { regex: pattern.clone(), ..Default::default() })
        }
        StringMatch::Contains(value) => {
            return Err(Error::config(format!(
                "unsupported match pattern 'contains' ({}) in CSRF additional origins",
                value
            )));
        }
    };

    Ok(StringMatcher { match_pattern: Some(pattern), ignore_case: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApiSnapshot, ResourceRef, Settings};
    use crate::xds::filters::decode_typed_config;

    fn plugin(global: Option<CsrfPolicy>) -> CsrfPlugin {
        let settings = Settings { csrf: global, ..Default::default() };
        let mut plugin = CsrfPlugin::default();
        plugin.init(&InitParams { settings: &settings }).expect("init");
        plugin.begin_pass();
        plugin
    }

    fn policy() -> CsrfPolicy {
        CsrfPolicy {
            filter_enabled: Some(RuntimeFraction::percent(100)),
            shadow_enabled: None,
            additional_origins: vec![
                StringMatch::Exact("https://example.com".into()),
                StringMatch::SafeRegex(r"https://.*\.example\.com".into()),
            ],
        }
    }

    fn decode(filter: &StagedFilter) -> CsrfPolicyProto {
        decode_typed_config(&filter.typed_config, CSRF_POLICY_TYPE_URL).expect("decode")
    }

    fn filters(plugin: &mut CsrfPlugin, listener: &Listener) -> Vec<StagedFilter> {
        let snapshot = ApiSnapshot::default();
        let mut params = Params::new(&snapshot);
        plugin.http_filters(&mut params, listener).expect("filters")
    }

    #[test]
    fn no_policy_anywhere_adds_nothing() {
        let mut plugin = plugin(None);
        assert!(filters(&mut plugin, &Listener::new("http", 8080)).is_empty());
    }

    #[test]
    fn listener_policy_adds_filter_after_cors() {
        let mut plugin = plugin(None);
        let mut listener = Listener::new("http", 8080);
        listener.http.options.csrf = Some(policy());

        let filters = filters(&mut plugin, &listener);
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].stage, FILTER_STAGE);
        let config = decode(&filters[0]);
        assert_eq!(config.additional_origins.len(), 2);
        assert_eq!(config.filter_enabled.and_then(|f| f.default_value).map(|v| v.numerator), Some(100));
    }

    #[test]
    fn listener_policy_merges_over_global() {
        let mut plugin = plugin(Some(CsrfPolicy {
            shadow_enabled: Some(RuntimeFraction::percent(50)),
            ..policy()
        }));
        let mut listener = Listener::new("http", 8080);
        listener.http.options.csrf = Some(CsrfPolicy {
            filter_enabled: Some(RuntimeFraction::percent(10)),
            ..Default::default()
        });

        let config = decode(&filters(&mut plugin, &listener)[0]);
        assert_eq!(config.filter_enabled.and_then(|f| f.default_value).map(|v| v.numerator), Some(10));
        assert_eq!(config.shadow_enabled.and_then(|f| f.default_value).map(|v| v.numerator), Some(50));
        assert_eq!(config.additional_origins.len(), 2);
    }

    #[test]
    fn nested_request_adds_disabled_listener_filter() {
        let mut plugin = plugin(None);
        let listener = Listener::new("http", 8080);
        let virtual_host = VirtualHost::default();
        let mut route = Route::to_upstream("/", ResourceRef::new("default", "svc"));
        route.options.csrf = Some(policy());

        let snapshot = ApiSnapshot::default();
        let mut params = Params::new(&snapshot);
        let mut output = EnvoyRoute::default();
        let context = RouteContext { listener: &listener, virtual_host: &virtual_host };
        plugin.process_route(&mut params, &context, &route, &mut output).expect("route");
        assert!(output.typed_per_filter_config.contains_key(FILTER_NAME));
        plugin.settle(true);

        let filters = filters(&mut plugin, &listener);
        assert_eq!(filters.len(), 1);
        let config = decode(&filters[0]);
        assert_eq!(config.filter_enabled.and_then(|f| f.default_value).map(|v| v.numerator), Some(0));

        let other = Listener::new("other", 9090);
        assert!(self::filters(&mut plugin, &other).is_empty());

        plugin.begin_pass();
        assert!(self::filters(&mut plugin, &listener).is_empty());
    }

    #[test]
    fn weighted_destination_request_is_tracked() {
        let mut plugin = plugin(None);
        let listener = Listener::new("http", 8080);
        let virtual_host = VirtualHost::default();
        let route = Route::to_upstream("/", ResourceRef::new("default", "svc"));
        let destination = WeightedDestination {
            upstream: ResourceRef::new("default", "svc"),
            weight: 1,
            options: crate::domain::WeightedDestinationOptions { csrf: Some(policy()) },
        };

        let snapshot = ApiSnapshot::default();
        let mut params = Params::new(&snapshot);
        let mut output = ClusterWeight::default();
        let context = WeightedDestinationContext { listener: &listener, virtual_host: &virtual_host, route: &route };
        plugin
            .process_weighted_destination(&mut params, &context, &destination, &mut output)
            .expect("weighted");
        plugin.settle(true);

        assert!(output.typed_per_filter_config.contains_key(FILTER_NAME));
        assert_eq!(filters(&mut plugin, &listener).len(), 1);
    }

    #[test]
    fn request_from_dropped_route_is_discarded() {
        let mut plugin = plugin(None);
        let listener = Listener::new("http", 8080);
        let virtual_host = VirtualHost::default();
        let mut route = Route::to_upstream("/", ResourceRef::new("default", "svc"));
        route.options.csrf = Some(policy());

        let snapshot = ApiSnapshot::default();
        let mut params = Params::new(&snapshot);
        let context = RouteContext { listener: &listener, virtual_host: &virtual_host };
        plugin
            .process_route(&mut params, &context, &route, &mut EnvoyRoute::default())
            .expect("route");
        plugin.settle(false);

        assert!(filters(&mut plugin, &listener).is_empty());
    }

    #[test]
    fn unsupported_and_invalid_origins_are_rejected() {
        let err = csrf_policy(&CsrfPolicy {
            additional_origins: vec![StringMatch::Contains("example".into())],
            ..Default::default()
        })
        .expect_err("contains");
        assert!(format!("{err}").contains("unsupported match pattern 'contains'"));
        assert!(err.is_config_error());

        let err = csrf_policy(&CsrfPolicy {
            additional_origins: vec![StringMatch::SafeRegex("(".into())],
            ..Default::default()
        })
        .expect_err("regex");
        assert!(format!("{err}").contains("invalid origin regex"));
    }

    #[test]
    fn invalid_global_policy_fails_init() {
        let settings = Settings {
            csrf: Some(CsrfPolicy {
                additional_origins: vec![StringMatch::Contains("x".into())],
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut plugin = CsrfPlugin::default();
        assert!(plugin.init(&InitParams { settings: &settings }).is_err());
    }

    #[test]
    fn runtime_key_and_denominator_are_carried() {
        let config = csrf_policy(&CsrfPolicy {
            filter_enabled: Some(RuntimeFraction {
                numerator: 5,
                denominator: FractionDenominator::TenThousand,
                runtime_key: Some("csrf.enabled".into()),
            }),
            ..Default::default()
        })
        .expect("policy");

        let enabled = config.filter_enabled.expect("enabled");
        assert_eq!(enabled.runtime_key, "csrf.enabled");
        assert_eq!(enabled.default_value.map(|v| v.denominator), Some(DenominatorType::TenThousand as i32));
    }
}
