//! Plugin framework.
//!
//! A plugin is a named feature module implementing any subset of the
//! capability traits below. The translator asks the [`PluginRegistry`] for
//! the plugins implementing a capability and calls them in registration
//! order, each one seeing the output left by the previous one.
//!
//! Plugins receive read-only input plus the single output message they are
//! allowed to edit, and must not keep references past the call.

pub mod csrf;
pub mod ext_proc;
pub mod health_check;
pub mod merge;
pub mod registry;
pub mod stage;
pub mod tap;

use std::fmt;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::route::v3::{
    weighted_cluster::ClusterWeight, Route as EnvoyRoute, VirtualHost as EnvoyVirtualHost,
};

use crate::domain::{ApiSnapshot, Listener, Route, Settings, Upstream, VirtualHost, WeightedDestination};
use crate::errors::Result;

pub use registry::PluginRegistry;
pub use stage::{FilterStage, StagePredicate, StagedFilter, WellKnownStage};

/// Capabilities a plugin may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Upstream,
    HttpFilters,
    VirtualHost,
    Route,
    WeightedDestination,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Upstream,
        Capability::HttpFilters,
        Capability::VirtualHost,
        Capability::Route,
        Capability::WeightedDestination,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Upstream => "ProcessUpstream",
            Capability::HttpFilters => "HttpFilters",
            Capability::VirtualHost => "ProcessVirtualHost",
            Capability::Route => "ProcessRoute",
            Capability::WeightedDestination => "ProcessWeightedDestination",
        };
        f.write_str(name)
    }
}

/// Capabilities discovered for a plugin at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|capability| self.contains(*capability))
    }
}

/// Passed to [`Plugin::init`].
#[derive(Debug, Clone, Copy)]
pub struct InitParams<'a> {
    pub settings: &'a Settings,
}

/// Per-pass state shared with every capability call.
#[derive(Debug)]
pub struct Params<'a> {
    pub snapshot: &'a ApiSnapshot,
    warnings: Vec<String>,
}

impl<'a> Params<'a> {
    pub fn new(snapshot: &'a ApiSnapshot) -> Self {
        Self { snapshot, warnings: Vec::new() }
    }

    /// Record a non-fatal problem; warnings never fail a pass.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

pub struct VirtualHostContext<'a> {
    pub listener: &'a Listener,
}

pub struct RouteContext<'a> {
    pub listener: &'a Listener,
    pub virtual_host: &'a VirtualHost,
}

pub struct WeightedDestinationContext<'a> {
    pub listener: &'a Listener,
    pub virtual_host: &'a VirtualHost,
    pub route: &'a Route,
}

/// Edits the cluster generated for one upstream.
pub trait UpstreamPlugin {
    fn process_upstream(
        &mut self,
        params: &mut Params<'_>,
        upstream: &Upstream,
        cluster: &mut Cluster,
    ) -> Result<()>;
}

/// Contributes filters to a listener's HTTP filter chain.
pub trait HttpFilterPlugin {
    fn http_filters(&mut self, params: &mut Params<'_>, listener: &Listener) -> Result<Vec<StagedFilter>>;
}

pub trait VirtualHostPlugin {
    fn process_virtual_host(
        &mut self,
        params: &mut Params<'_>,
        context: &VirtualHostContext<'_>,
        virtual_host: &VirtualHost,
        output: &mut EnvoyVirtualHost,
    ) -> Result<()>;
}

pub trait RoutePlugin {
    fn process_route(
        &mut self,
        params: &mut Params<'_>,
        context: &RouteContext<'_>,
        route: &Route,
        output: &mut EnvoyRoute,
    ) -> Result<()>;
}

pub trait WeightedDestinationPlugin {
    fn process_weighted_destination(
        &mut self,
        params: &mut Params<'_>,
        context: &WeightedDestinationContext<'_>,
        destination: &WeightedDestination,
        output: &mut ClusterWeight,
    ) -> Result<()>;
}

/// A feature module. Capability accessors return `None` unless overridden.
pub trait Plugin: Send {
    /// Stable identifier used in errors and logs.
    fn name(&self) -> &'static str;

    /// Capture global settings. Called exactly once before any pass.
    fn init(&mut self, params: &InitParams<'_>) -> Result<()>;

    /// Reset state tracked across calls within one pass.
    fn begin_pass(&mut self) {}

    /// Called after each virtual host and route with whether it was kept
    /// in the output. State recorded for a dropped resource is discarded.
    fn settle(&mut self, _kept: bool) {}

    fn as_upstream(&mut self) -> Option<&mut dyn UpstreamPlugin> {
        None
    }

    fn as_http_filters(&mut self) -> Option<&mut dyn HttpFilterPlugin> {
        None
    }

    fn as_virtual_host(&mut self) -> Option<&mut dyn VirtualHostPlugin> {
        None
    }

    fn as_route(&mut self) -> Option<&mut dyn RoutePlugin> {
        None
    }

    fn as_weighted_destination(&mut self) -> Option<&mut dyn WeightedDestinationPlugin> {
        None
    }
}
