//! Translation pass orchestration
//!
//! A pass walks one proxy of an [`ApiSnapshot`] through the phases
//!
//! ```text
//! Idle → PerResourceDispatch → FilterOrdering → ResourceAssembly → Fingerprinting → Published
//! ```
//!
//! and may move to `Failed` from any of them. Upstreams, virtual hosts,
//! routes, weighted destinations and listeners fail independently: the
//! resource is dropped and its error lands in the [`TranslationReport`].
//! Failures in the shared phases (filter ordering, fingerprinting) abort the
//! whole pass. Nothing reaches a [`SnapshotCache`] unless the pass is clean.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener as EnvoyListener;
use envoy_types::pb::envoy::config::route::v3::{
    Route as EnvoyRoute, RouteConfiguration, VirtualHost as EnvoyVirtualHost,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use tracing::{debug, error, info, warn};

use crate::config::TranslatorConfig;
use crate::domain::{ApiSnapshot, Listener, Proxy, Route, RouteAction, Settings, Upstream, VirtualHost};
use crate::errors::{Error, ResourceIdentity, ResourceKind, Result};
use crate::observability::{PassOutcome, TranslationMetrics};
use crate::plugins::stage::order_filters;
use crate::plugins::{
    Capability, Params, PluginRegistry, RouteContext, StagedFilter, VirtualHostContext,
    WeightedDestinationContext,
};
use crate::xds::cluster::build_cluster;
use crate::xds::filters::http::build_http_filters;
use crate::xds::fingerprint::SnapshotFingerprint;
use crate::xds::listener::{build_listener, route_config_name};
use crate::xds::route::{
    cluster_weight, route_configuration, routes_for, upstream_action, validate_virtual_host_domains,
    virtual_host_shell, weighted_action,
};
use crate::xds::state::{PublishOutcome, SnapshotCache};
use crate::{plugin_span, translation_span};

/// Phase of the most recent pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationPhase {
    Idle,
    PerResourceDispatch,
    FilterOrdering,
    ResourceAssembly,
    Fingerprinting,
    Published,
    Failed,
}

impl fmt::Display for TranslationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TranslationPhase::Idle => "Idle",
            TranslationPhase::PerResourceDispatch => "PerResourceDispatch",
            TranslationPhase::FilterOrdering => "FilterOrdering",
            TranslationPhase::ResourceAssembly => "ResourceAssembly",
            TranslationPhase::Fingerprinting => "Fingerprinting",
            TranslationPhase::Published => "Published",
            TranslationPhase::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Per-resource errors and warnings accumulated during a pass.
#[derive(Debug, Default)]
pub struct TranslationReport {
    pub errors: Vec<Error>,
    pub warnings: Vec<String>,
}

impl TranslationReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Warnings when no resource failed, otherwise every error combined.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(Error::Aggregate { errors: self.errors })
        }
    }
}

/// Envoy resources generated for one proxy, each list sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyResourceSet {
    pub clusters: Vec<Cluster>,
    pub listeners: Vec<EnvoyListener>,
    pub routes: Vec<RouteConfiguration>,
}

impl ProxyResourceSet {
    pub fn sort(&mut self) {
        self.clusters.sort_by(|a, b| a.name.cmp(&b.name));
        self.listeners.sort_by(|a, b| a.name.cmp(&b.name));
        self.routes.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn fingerprint(&self) -> Result<SnapshotFingerprint> {
        SnapshotFingerprint::compute(&self.clusters, &self.listeners, &self.routes)
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|cluster| cluster.name == name)
    }

    pub fn listener(&self, name: &str) -> Option<&EnvoyListener> {
        self.listeners.iter().find(|listener| listener.name == name)
    }

    pub fn route_configuration(&self, name: &str) -> Option<&RouteConfiguration> {
        self.routes.iter().find(|routes| routes.name == name)
    }
}

#[derive(Debug)]
pub struct TranslationOutput {
    pub resources: ProxyResourceSet,
    pub fingerprint: SnapshotFingerprint,
    pub report: TranslationReport,
}

/// Runs translation passes with one initialized plugin registry.
///
/// Passes take `&mut self` and are therefore serialized; independent
/// translators may run on separate threads.
pub struct Translator {
    registry: PluginRegistry,
    config: TranslatorConfig,
    metrics: TranslationMetrics,
    phase: TranslationPhase,
    generation: u64,
}

impl Translator {
    /// Wrap an already initialized registry.
    pub fn new(registry: PluginRegistry, config: TranslatorConfig) -> Result<Self> {
        registry.ensure_initialized()?;
        config.validate()?;

        Ok(Self {
            registry,
            config,
            metrics: TranslationMetrics::new(),
            phase: TranslationPhase::Idle,
            generation: 0,
        })
    }

    /// Translator with the built-in plugins initialized from `settings`.
    pub fn with_default_plugins(settings: &Settings, config: TranslatorConfig) -> Result<Self> {
        let mut registry = PluginRegistry::with_default_plugins();
        registry.init(settings)?;
        Self::new(registry, config)
    }

    pub fn phase(&self) -> TranslationPhase {
        self.phase
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Translate `proxy` without publishing.
    pub fn translate(&mut self, snapshot: &ApiSnapshot, proxy: &Proxy) -> Result<TranslationOutput> {
        let started = Instant::now();
        let result = self.run_pass(snapshot, proxy);

        let outcome = if result.is_ok() { PassOutcome::Translated } else { PassOutcome::Failed };
        self.metrics.record_pass(outcome, started.elapsed().as_secs_f64());
        result
    }

    /// Translate `proxy` and swap the result into `cache`. A pass with any
    /// per-resource error fails and leaves the cached snapshot in place.
    pub fn publish(
        &mut self,
        snapshot: &ApiSnapshot,
        proxy: &Proxy,
        cache: &SnapshotCache,
    ) -> Result<PublishOutcome> {
        let started = Instant::now();
        let result = self.run_pass(snapshot, proxy).and_then(|output| {
            let TranslationOutput { resources, fingerprint, report } = output;
            report.into_result().map_err(|err| Error::pass(TranslationPhase::Published, err))?;
            Ok(cache.publish(&proxy.metadata.reference(), resources, fingerprint))
        });

        let outcome = match &result {
            Ok(published) => {
                self.phase = TranslationPhase::Published;
                self.metrics.record_publish(published.is_published());
                if published.is_published() {
                    PassOutcome::Published
                } else {
                    PassOutcome::Unchanged
                }
            }
            Err(err) => {
                self.phase = TranslationPhase::Failed;
                error!(proxy = %proxy.metadata.reference(), error = %err, "Snapshot not published");
                PassOutcome::Failed
            }
        };
        self.metrics.record_pass(outcome, started.elapsed().as_secs_f64());
        result
    }

    fn run_pass(&mut self, snapshot: &ApiSnapshot, proxy: &Proxy) -> Result<TranslationOutput> {
        self.generation += 1;
        let proxy_ref = proxy.metadata.reference();
        let span = translation_span!(proxy_ref, generation = self.generation);
        let _entered = span.enter();

        self.phase = TranslationPhase::Idle;
        let pass = Pass {
            registry: &mut self.registry,
            config: &self.config,
            metrics: &self.metrics,
            phase: &mut self.phase,
            params: Params::new(snapshot),
            report: TranslationReport::default(),
        };

        let result = pass.run(proxy);
        match result {
            Ok(output) => {
                self.metrics.record_warnings(output.report.warnings.len());
                info!(
                    clusters = output.resources.clusters.len(),
                    listeners = output.resources.listeners.len(),
                    route_configurations = output.resources.routes.len(),
                    errors = output.report.errors.len(),
                    warnings = output.report.warnings.len(),
                    fingerprint = %output.fingerprint,
                    "Translation pass complete"
                );
                Ok(output)
            }
            Err(err) => {
                self.phase = TranslationPhase::Failed;
                error!(error = %err, "Translation pass failed");
                Err(err)
            }
        }
    }
}

/// Call every plugin implementing a capability, in registration order,
/// attaching plugin and resource context to warnings and errors.
macro_rules! dispatch {
    ($pass:ident, $plugins:ident, $capability:expr, $identity:expr, |$name:ident, $plugin:ident| $call:expr) => {
        for ($name, $plugin) in $pass.registry.$plugins() {
            let _span = plugin_span!($name, $capability, $identity).entered();
            debug!(plugin = $name, capability = %$capability, "Dispatching plugin");
            let outcome = $call;
            drain_warnings(&mut $pass.params, &mut $pass.report, $name, $identity);
            outcome.map_err(|err| Error::plugin($name, $capability, $identity.clone(), err))?;
        }
    };
}

/// Indices of `items` grouped by `key`.
fn group_by_key<T>(items: &[T], key: impl Fn(&T) -> String) -> HashMap<String, Vec<usize>> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        groups.entry(key(item)).or_default().push(index);
    }
    groups
}

/// Keys claimed more than once, sorted, with their counts.
fn conflicting(groups: &HashMap<String, Vec<usize>>) -> BTreeMap<String, usize> {
    groups
        .iter()
        .filter(|(_, indices)| indices.len() > 1)
        .map(|(key, indices)| (key.clone(), indices.len()))
        .collect()
}

fn drain_warnings(
    params: &mut Params<'_>,
    report: &mut TranslationReport,
    plugin: &str,
    resource: &ResourceIdentity,
) {
    for warning in params.take_warnings() {
        warn!(plugin, resource = %resource, warning = %warning, "Plugin reported a warning");
        report.warnings.push(format!("plugin '{}' on {}: {}", plugin, resource, warning));
    }
}

struct Pass<'a> {
    registry: &'a mut PluginRegistry,
    config: &'a TranslatorConfig,
    metrics: &'a TranslationMetrics,
    phase: &'a mut TranslationPhase,
    params: Params<'a>,
    report: TranslationReport,
}

struct ListenerPlan<'p> {
    listener: &'p Listener,
    routes: Option<RouteConfiguration>,
    http_filters: Vec<HttpFilter>,
}

impl<'a> Pass<'a> {
    fn enter(&mut self, phase: TranslationPhase) {
        debug!(phase = %phase, "Entering translation phase");
        *self.phase = phase;
    }

    fn record(&mut self, kind: ResourceKind, err: Error) {
        warn!(error = %err, "Dropping resource from translation output");
        self.metrics.record_resource_error(&kind.to_string());
        self.report.errors.push(err);
    }

    fn run(mut self, proxy: &Proxy) -> Result<TranslationOutput> {
        self.enter(TranslationPhase::PerResourceDispatch);
        self.registry
            .begin_pass()
            .map_err(|err| Error::pass(TranslationPhase::PerResourceDispatch, err))?;

        let clusters = self.translate_upstreams();
        let listeners = self.unique_listeners(proxy);
        let route_configs: Vec<(&Listener, Option<RouteConfiguration>)> = listeners
            .into_iter()
            .map(|listener| (listener, self.translate_route_configuration(listener)))
            .collect();

        self.enter(TranslationPhase::FilterOrdering);
        let mut plans = Vec::with_capacity(route_configs.len());
        for (listener, routes) in route_configs {
            if let Some(http_filters) = self
                .listener_filters(listener)
                .map_err(|err| Error::pass(TranslationPhase::FilterOrdering, err))?
            {
                plans.push(ListenerPlan { listener, routes, http_filters });
            }
        }

        self.enter(TranslationPhase::ResourceAssembly);
        let mut resources = ProxyResourceSet { clusters, ..Default::default() };
        for plan in plans {
            match build_listener(plan.listener, &self.config.listeners, plan.http_filters) {
                Ok(listener) => {
                    resources.listeners.push(listener);
                    resources.routes.extend(plan.routes);
                }
                Err(err) => {
                    let identity = ResourceIdentity::new(ResourceKind::Listener, plan.listener.name.clone());
                    self.record(ResourceKind::Listener, Error::resource(identity, err));
                }
            }
        }
        resources.sort();

        self.enter(TranslationPhase::Fingerprinting);
        let fingerprint = resources
            .fingerprint()
            .map_err(|err| Error::pass(TranslationPhase::Fingerprinting, err))?;

        Ok(TranslationOutput { resources, fingerprint, report: self.report })
    }

    /// Listeners with a name no other listener of `proxy` uses. Every
    /// listener sharing a name is dropped, with one error per name.
    fn unique_listeners<'p>(&mut self, proxy: &'p Proxy) -> Vec<&'p Listener> {
        let groups = group_by_key(&proxy.listeners, |listener| listener.name.clone());
        for (name, count) in conflicting(&groups) {
            let err = Error::config(format!("listener name '{}' is used by {} listeners", name, count));
            self.record(ResourceKind::Listener, Error::resource(ResourceIdentity::new(ResourceKind::Listener, name), err));
        }

        proxy.listeners.iter().filter(|listener| groups[&listener.name].len() == 1).collect()
    }

    fn translate_upstreams(&mut self) -> Vec<Cluster> {
        let snapshot = self.params.snapshot;
        let mut clusters = Vec::with_capacity(snapshot.upstreams.len());

        let groups = group_by_key(&snapshot.upstreams, Upstream::cluster_name);
        for (cluster, _) in conflicting(&groups) {
            let upstreams = groups[&cluster]
                .iter()
                .map(|&index| snapshot.upstreams[index].reference().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let err = Error::config(format!("upstreams {} all generate cluster '{}'", upstreams, cluster));
            self.record(ResourceKind::Upstream, Error::resource(ResourceIdentity::new(ResourceKind::Cluster, cluster), err));
        }

        for upstream in &snapshot.upstreams {
            if groups[&upstream.cluster_name()].len() > 1 {
                continue;
            }
            let identity = ResourceIdentity::new(ResourceKind::Upstream, upstream.metadata.reference().to_string());
            match self.translate_upstream(upstream, &identity) {
                Ok(cluster) => clusters.push(cluster),
                Err(err) => self.record(ResourceKind::Upstream, err),
            }
        }
        clusters
    }

    fn translate_upstream(&mut self, upstream: &Upstream, identity: &ResourceIdentity) -> Result<Cluster> {
        let mut cluster = build_cluster(upstream).map_err(|err| Error::resource(identity.clone(), err))?;

        dispatch!(self, upstream_plugins, Capability::Upstream, identity, |name, plugin| {
            plugin.process_upstream(&mut self.params, upstream, &mut cluster)
        });
        Ok(cluster)
    }

    fn translate_route_configuration(&mut self, listener: &Listener) -> Option<RouteConfiguration> {
        if listener.http.virtual_hosts.is_empty() {
            return None;
        }

        let mut conflicts: HashMap<usize, Vec<Error>> = HashMap::new();
        for (index, err) in validate_virtual_host_domains(&listener.http.virtual_hosts) {
            conflicts.entry(index).or_default().push(err);
        }

        let mut virtual_hosts = Vec::with_capacity(listener.http.virtual_hosts.len());
        for (index, virtual_host) in listener.http.virtual_hosts.iter().enumerate() {
            let identity = ResourceIdentity::new(
                ResourceKind::VirtualHost,
                format!("{}/{}", listener.name, virtual_host.name),
            );
            if let Some(errors) = conflicts.remove(&index) {
                for err in errors {
                    self.record(ResourceKind::VirtualHost, Error::resource(identity.clone(), err));
                }
                continue;
            }
            match self.translate_virtual_host(listener, virtual_host, &identity) {
                Ok(envoy_virtual_host) => virtual_hosts.push(envoy_virtual_host),
                Err(err) => self.record(ResourceKind::VirtualHost, err),
            }
        }

        Some(route_configuration(route_config_name(listener, &self.config.listeners), virtual_hosts))
    }

    fn translate_virtual_host(
        &mut self,
        listener: &Listener,
        virtual_host: &VirtualHost,
        identity: &ResourceIdentity,
    ) -> Result<EnvoyVirtualHost> {
        let shell = self.virtual_host_output(listener, virtual_host, identity);
        self.registry.settle(shell.is_ok());
        let mut output = shell?;

        for (index, route) in virtual_host.routes.iter().enumerate() {
            let route_name = route.name.clone().unwrap_or_else(|| format!("route-{}", index));
            let route_identity = ResourceIdentity::new(
                ResourceKind::Route,
                format!("{}/{}/{}", listener.name, virtual_host.name, route_name),
            );
            let translated = self.translate_route(listener, virtual_host, route, &route_identity);
            self.registry.settle(translated.is_ok());
            match translated {
                Ok(routes) => output.routes.extend(routes),
                Err(err) => self.record(ResourceKind::Route, err),
            }
        }

        Ok(output)
    }

    fn virtual_host_output(
        &mut self,
        listener: &Listener,
        virtual_host: &VirtualHost,
        identity: &ResourceIdentity,
    ) -> Result<EnvoyVirtualHost> {
        let mut output = virtual_host_shell(virtual_host).map_err(|err| Error::resource(identity.clone(), err))?;

        let context = VirtualHostContext { listener };
        dispatch!(self, virtual_host_plugins, Capability::VirtualHost, identity, |name, plugin| {
            plugin.process_virtual_host(&mut self.params, &context, virtual_host, &mut output)
        });
        Ok(output)
    }

    fn translate_route(
        &mut self,
        listener: &Listener,
        virtual_host: &VirtualHost,
        route: &Route,
        identity: &ResourceIdentity,
    ) -> Result<Vec<EnvoyRoute>> {
        let snapshot = self.params.snapshot;
        let action = match &route.action {
            RouteAction::Upstream(upstream) => {
                upstream_action(snapshot, upstream).map_err(|err| Error::resource(identity.clone(), err))?
            }
            RouteAction::Weighted(destinations) => {
                let context = WeightedDestinationContext { listener, virtual_host, route };
                let mut weights = Vec::with_capacity(destinations.len());

                for destination in destinations {
                    let destination_identity = ResourceIdentity::new(
                        ResourceKind::WeightedDestination,
                        format!("{}/{}", identity.name, destination.upstream),
                    );
                    let destination_identity = &destination_identity;
                    let mut weight = cluster_weight(snapshot, destination)
                        .map_err(|err| Error::resource(destination_identity.clone(), err))?;

                    dispatch!(
                        self,
                        weighted_destination_plugins,
                        Capability::WeightedDestination,
                        destination_identity,
                        |name, plugin| {
                            plugin.process_weighted_destination(&mut self.params, &context, destination, &mut weight)
                        }
                    );
                    weights.push(weight);
                }

                weighted_action(weights).map_err(|err| Error::resource(identity.clone(), err))?
            }
        };

        let mut routes = routes_for(route, &action).map_err(|err| Error::resource(identity.clone(), err))?;

        let context = RouteContext { listener, virtual_host };
        for output in &mut routes {
            dispatch!(self, route_plugins, Capability::Route, identity, |name, plugin| {
                plugin.process_route(&mut self.params, &context, route, output)
            });
        }

        Ok(routes)
    }

    /// Ordered chain for `listener`. `Ok(None)` drops the listener after a
    /// plugin failure; `Err` is an ordering failure that aborts the pass.
    fn listener_filters(&mut self, listener: &Listener) -> Result<Option<Vec<HttpFilter>>> {
        let identity = ResourceIdentity::new(ResourceKind::Listener, listener.name.clone());

        let contributed = match self.contributed_filters(listener, &identity) {
            Ok(contributed) => contributed,
            Err(err) => {
                self.record(ResourceKind::Listener, err);
                return Ok(None);
            }
        };

        let ordered = order_filters(contributed, self.config.filters.duplicate_policy)
            .map_err(|err| Error::resource(identity.clone(), err))?;
        debug!(
            listener = %listener.name,
            filters = ?ordered.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            "Resolved HTTP filter order"
        );

        build_http_filters(&ordered).map(Some).map_err(|err| Error::resource(identity, err))
    }

    fn contributed_filters(&mut self, listener: &Listener, identity: &ResourceIdentity) -> Result<Vec<StagedFilter>> {
        let mut contributed = Vec::new();
        dispatch!(self, http_filter_plugins, Capability::HttpFilters, identity, |name, plugin| {
            plugin.http_filters(&mut self.params, listener).map(|filters| contributed.extend(filters))
        });
        Ok(contributed)
    }
}
