//! Base route builders
//!
//! Plugin-free conversion of virtual hosts, routes and weighted destinations
//! into Envoy messages. The translator assembles the pieces and runs the
//! matching plugin capability on each one as it is produced.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier,
    weighted_cluster::ClusterWeight, Route as EnvoyRoute, RouteAction as EnvoyRouteAction,
    RouteConfiguration, RouteMatch, VirtualHost as EnvoyVirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::r#type::matcher::v3::RegexMatcher;
use envoy_types::pb::google::protobuf::UInt32Value;

use crate::domain::{ApiSnapshot, ResourceRef, Route, RouteMatcher, VirtualHost, WeightedDestination};
use crate::errors::{Error, Result};

pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// Virtual host with name and domains; routes are appended by the caller.
pub fn virtual_host_shell(virtual_host: &VirtualHost) -> Result<EnvoyVirtualHost> {
    if virtual_host.name.trim().is_empty() {
        return Err(Error::validation_field("virtual host name cannot be empty", "name"));
    }

    let domains = if virtual_host.domains.is_empty() {
        vec!["*".to_string()]
    } else {
        virtual_host.domains.clone()
    };

    Ok(EnvoyVirtualHost { name: virtual_host.name.clone(), domains, ..Default::default() })
}

/// One Envoy route per matcher, all sharing `action`. No matcher means prefix `/`.
pub fn routes_for(route: &Route, action: &EnvoyRouteAction) -> Result<Vec<EnvoyRoute>> {
    let default_matcher = [RouteMatcher::Prefix("/".to_string())];
    let matchers = if route.matchers.is_empty() { &default_matcher[..] } else { &route.matchers[..] };

    matchers
        .iter()
        .map(|matcher| {
            Ok(EnvoyRoute {
                name: route.name.clone().unwrap_or_default(),
                r#match: Some(route_match(matcher)?),
                action: Some(Action::Route(action.clone())),
                ..Default::default()
            })
        })
        .collect()
}

pub fn route_match(matcher: &RouteMatcher) -> Result<RouteMatch> {
    let path_specifier = match matcher {
        RouteMatcher::Exact(path) => PathSpecifier::Path(path.clone()),
        RouteMatcher::Prefix(prefix) => PathSpecifier::Prefix(prefix.clone()),
        RouteMatcher::Regex(pattern) => {
            regex::Regex::new(pattern).map_err(|err| {
                Error::validation_field(format!("invalid route regex '{}': {}", pattern, err), "matchers")
            })?;
            PathSpecifier::SafeRegex(RegexMatcher { regex: pattern.clone(), ..Default::default() })
        }
    };

    Ok(RouteMatch { path_specifier: Some(path_specifier), ..Default::default() })
}

/// Single-upstream action. The upstream must exist in the snapshot.
pub fn upstream_action(snapshot: &ApiSnapshot, upstream: &ResourceRef) -> Result<EnvoyRouteAction> {
    snapshot.find_upstream(upstream)?;

    #[allow(deprecated)]
    let action = EnvoyRouteAction {
        cluster_specifier: Some(ClusterSpecifier::Cluster(upstream.cluster_name())),
        ..Default::default()
    };
    Ok(action)
}

/// Weighted entry for one destination, before plugins run on it.
pub fn cluster_weight(snapshot: &ApiSnapshot, destination: &WeightedDestination) -> Result<ClusterWeight> {
    snapshot.find_upstream(&destination.upstream)?;

    Ok(ClusterWeight {
        name: destination.upstream.cluster_name(),
        weight: Some(UInt32Value { value: destination.weight }),
        ..Default::default()
    })
}

pub fn weighted_action(clusters: Vec<ClusterWeight>) -> Result<EnvoyRouteAction> {
    if clusters.is_empty() {
        return Err(Error::validation_field(
            "weighted route needs at least one destination",
            "action.weighted",
        ));
    }
    if clusters.iter().all(|cluster| cluster.weight.as_ref().map(|w| w.value).unwrap_or(0) == 0) {
        return Err(Error::validation_field(
            "weighted route destinations cannot all have weight 0",
            "action.weighted",
        ));
    }

    #[allow(deprecated)]
    let action = EnvoyRouteAction {
        cluster_specifier: Some(ClusterSpecifier::WeightedClusters(WeightedCluster {
            clusters,
            ..Default::default()
        })),
        ..Default::default()
    };
    Ok(action)
}

pub fn route_configuration(name: impl Into<String>, virtual_hosts: Vec<EnvoyVirtualHost>) -> RouteConfiguration {
    RouteConfiguration { name: name.into(), virtual_hosts, ..Default::default() }
}

/// Domain problems among the virtual hosts of one route configuration,
/// keyed by virtual host index. Each virtual host sharing a domain gets its
/// own error, as does one listing an empty domain. A virtual host without
/// domains claims `*`.
pub fn validate_virtual_host_domains(virtual_hosts: &[VirtualHost]) -> Vec<(usize, Error)> {
    let mut claims: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut errors = Vec::new();

    for (index, virtual_host) in virtual_hosts.iter().enumerate() {
        if virtual_host.domains.is_empty() {
            claims.entry("*").or_default().push(index);
        }
        for domain in &virtual_host.domains {
            if domain.is_empty() {
                errors.push((
                    index,
                    Error::validation_field(
                        format!("virtual host '{}' has an empty domain", virtual_host.name),
                        "domains",
                    ),
                ));
            }
            claims.entry(domain.as_str()).or_default().push(index);
        }
    }

    for (domain, indices) in claims.iter().filter(|(_, indices)| indices.len() > 1) {
        let names = indices.iter().map(|&index| virtual_hosts[index].name.as_str()).collect::<Vec<_>>().join(", ");
        for &index in indices {
            errors.push((
                index,
                Error::validation_field(
                    format!("domain '{}' is shared by the following virtual hosts: {}", domain, names),
                    "domains",
                ),
            ));
        }
    }

    errors.sort_by_key(|(index, _)| *index);
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Host, Metadata, Upstream, WeightedDestinationOptions};

    fn snapshot() -> ApiSnapshot {
        ApiSnapshot::with_upstreams(vec![Upstream {
            metadata: Metadata::new("default", "svc"),
            hosts: vec![Host::new("10.0.0.1", 8080)],
            ..Default::default()
        }])
    }

    #[test]
    fn test_path_matching() {
        assert!(matches!(
            route_match(&RouteMatcher::Exact("/a".into())).expect("exact").path_specifier,
            Some(PathSpecifier::Path(_))
        ));
        assert!(matches!(
            route_match(&RouteMatcher::Prefix("/".into())).expect("prefix").path_specifier,
            Some(PathSpecifier::Prefix(_))
        ));
        assert!(matches!(
            route_match(&RouteMatcher::Regex("^/v[0-9]+/.*".into())).expect("regex").path_specifier,
            Some(PathSpecifier::SafeRegex(_))
        ));

        let err = route_match(&RouteMatcher::Regex("(".into())).expect_err("bad regex");
        assert!(format!("{err}").contains("invalid route regex"));
    }

    #[test]
    fn one_route_per_matcher() {
        let action = upstream_action(&snapshot(), &ResourceRef::new("default", "svc")).expect("action");
        let mut route = Route::to_upstream("/a", ResourceRef::new("default", "svc"));
        route.name = Some("r".into());
        route.matchers.push(RouteMatcher::Exact("/b".into()));

        let routes = routes_for(&route, &action).expect("routes");
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.name == "r"));

        route.matchers.clear();
        let routes = routes_for(&route, &action).expect("default");
        assert_eq!(
            routes[0].r#match.as_ref().and_then(|m| m.path_specifier.clone()),
            Some(PathSpecifier::Prefix("/".into()))
        );
    }

    #[test]
    fn missing_upstream_is_a_lookup_failure() {
        let err = upstream_action(&snapshot(), &ResourceRef::new("default", "missing")).expect_err("missing");
        assert!(err.is_lookup_failure());
        assert!(format!("{err}").contains("default.missing"));
    }

    #[test]
    fn weighted_action_targets_cluster_names() {
        let destination = WeightedDestination {
            upstream: ResourceRef::new("default", "svc"),
            weight: 3,
            options: WeightedDestinationOptions::default(),
        };
        let weight = cluster_weight(&snapshot(), &destination).expect("weight");
        assert_eq!(weight.name, "svc_default");

        let action = weighted_action(vec![weight]).expect("action");
        let Some(ClusterSpecifier::WeightedClusters(weighted)) = action.cluster_specifier else {
            panic!("expected weighted clusters");
        };
        assert_eq!(weighted.clusters[0].weight, Some(UInt32Value { value: 3 }));

        assert!(weighted_action(Vec::new()).is_err());
    }

    #[test]
    fn virtual_host_defaults_to_wildcard_domain() {
        let vh = virtual_host_shell(&VirtualHost { name: "vh".into(), ..Default::default() }).expect("vh");
        assert_eq!(vh.domains, vec!["*"]);

        assert!(virtual_host_shell(&VirtualHost::default()).is_err());
    }

    fn host(name: &str, domains: &[&str]) -> VirtualHost {
        VirtualHost {
            name: name.into(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn shared_domain_is_reported_on_every_claimant() {
        let hosts = vec![
            host("api", &["api.example.com", "example.com"]),
            host("web", &["www.example.com"]),
            host("legacy", &["example.com"]),
        ];

        let errors = validate_virtual_host_domains(&hosts);
        let indices: Vec<_> = errors.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![0, 2]);
        for (_, err) in &errors {
            let text = format!("{err}");
            assert!(text.contains("domain 'example.com' is shared by the following virtual hosts: api, legacy"));
            assert!(err.is_config_error());
        }
    }

    #[test]
    fn two_catch_all_hosts_conflict_on_wildcard() {
        let errors = validate_virtual_host_domains(&[host("a", &[]), host("b", &["*"])]);
        assert_eq!(errors.len(), 2);
        assert!(format!("{}", errors[0].1).contains("domain '*'"));
    }

    #[test]
    fn empty_domain_is_rejected_and_distinct_domains_pass() {
        let errors = validate_virtual_host_domains(&[host("blank", &[""])]);
        assert_eq!(errors.len(), 1);
        assert!(format!("{}", errors[0].1).contains("virtual host 'blank' has an empty domain"));

        assert!(validate_virtual_host_domains(&[host("a", &["a.com"]), host("b", &["b.com"])]).is_empty());
    }
}
