//! Plugin registry and capability dispatch.

use tracing::{debug, info};

use super::csrf::CsrfPlugin;
use super::ext_proc::ExtProcPlugin;
use super::health_check::HealthCheckPlugin;
use super::tap::TapPlugin;
use super::{
    Capability, CapabilitySet, HttpFilterPlugin, InitParams, Plugin, RoutePlugin, UpstreamPlugin,
    VirtualHostPlugin, WeightedDestinationPlugin,
};
use crate::domain::Settings;
use crate::errors::{Error, Result};

struct Registered {
    plugin: Box<dyn Plugin>,
    capabilities: CapabilitySet,
}

/// Ordered set of plugins. Registration order is dispatch order.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<Registered>,
    initialized: bool,
}

fn probe(plugin: &mut dyn Plugin) -> CapabilitySet {
    let mut set = CapabilitySet::default();
    if plugin.as_upstream().is_some() {
        set.insert(Capability::Upstream);
    }
    if plugin.as_http_filters().is_some() {
        set.insert(Capability::HttpFilters);
    }
    if plugin.as_virtual_host().is_some() {
        set.insert(Capability::VirtualHost);
    }
    if plugin.as_route().is_some() {
        set.insert(Capability::Route);
    }
    if plugin.as_weighted_destination().is_some() {
        set.insert(Capability::WeightedDestination);
    }
    set
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in plugins.
    pub fn with_default_plugins() -> Self {
        let mut registry = Self::new();
        registry.entries = default_plugins()
            .into_iter()
            .map(|mut plugin| {
                let capabilities = probe(plugin.as_mut());
                Registered { plugin, capabilities }
            })
            .collect();
        registry
    }

    /// Add a plugin. Capabilities are discovered once, here.
    pub fn register(&mut self, mut plugin: Box<dyn Plugin>) -> Result<&mut Self> {
        if self.initialized {
            return Err(Error::config(format!(
                "cannot register plugin '{}' after initialization",
                plugin.name()
            )));
        }
        if self.entries.iter().any(|entry| entry.plugin.name() == plugin.name()) {
            return Err(Error::config(format!("plugin '{}' is already registered", plugin.name())));
        }

        let capabilities = probe(plugin.as_mut());
        debug!(
            plugin = plugin.name(),
            capabilities = ?capabilities.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            "Registered plugin"
        );
        self.entries.push(Registered { plugin, capabilities });
        Ok(self)
    }

    /// Initialize every plugin in registration order. The first failure aborts.
    pub fn init(&mut self, settings: &Settings) -> Result<()> {
        if self.initialized {
            return Err(Error::config("plugin registry is already initialized"));
        }

        let params = InitParams { settings };
        for entry in &mut self.entries {
            let name = entry.plugin.name();
            entry.plugin.init(&params).map_err(|err| {
                Error::config_with_source(format!("plugin '{}' failed to initialize", name), Box::new(err))
            })?;
        }

        self.initialized = true;
        info!(plugins = self.entries.len(), "Plugin registry initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::config("plugin registry used before initialization"))
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.plugin.name()).collect()
    }

    pub fn capabilities_of(&self, name: &str) -> Option<CapabilitySet> {
        self.entries
            .iter()
            .find(|entry| entry.plugin.name() == name)
            .map(|entry| entry.capabilities)
    }

    /// Names of plugins implementing `capability`, in registration order.
    pub fn plugins_implementing(&self, capability: Capability) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|entry| entry.capabilities.contains(capability))
            .map(|entry| entry.plugin.name())
            .collect()
    }

    /// Reset per-pass plugin state.
    pub fn begin_pass(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        for entry in &mut self.entries {
            entry.plugin.begin_pass();
        }
        Ok(())
    }

    /// Close out the virtual host or route that was just processed.
    pub fn settle(&mut self, kept: bool) {
        for entry in &mut self.entries {
            entry.plugin.settle(kept);
        }
    }

    fn capable(&mut self, capability: Capability) -> impl Iterator<Item = &mut Registered> + '_ {
        self.entries.iter_mut().filter(move |entry| entry.capabilities.contains(capability))
    }

    pub fn upstream_plugins(&mut self) -> impl Iterator<Item = (&'static str, &mut dyn UpstreamPlugin)> + '_ {
        self.capable(Capability::Upstream).filter_map(|entry| {
            let name = entry.plugin.name();
            entry.plugin.as_upstream().map(|plugin| (name, plugin))
        })
    }

    pub fn http_filter_plugins(
        &mut self,
    ) -> impl Iterator<Item = (&'static str, &mut dyn HttpFilterPlugin)> + '_ {
        self.capable(Capability::HttpFilters).filter_map(|entry| {
            let name = entry.plugin.name();
            entry.plugin.as_http_filters().map(|plugin| (name, plugin))
        })
    }

    pub fn virtual_host_plugins(
        &mut self,
    ) -> impl Iterator<Item = (&'static str, &mut dyn VirtualHostPlugin)> + '_ {
        self.capable(Capability::VirtualHost).filter_map(|entry| {
            let name = entry.plugin.name();
            entry.plugin.as_virtual_host().map(|plugin| (name, plugin))
        })
    }

    pub fn route_plugins(&mut self) -> impl Iterator<Item = (&'static str, &mut dyn RoutePlugin)> + '_ {
        self.capable(Capability::Route).filter_map(|entry| {
            let name = entry.plugin.name();
            entry.plugin.as_route().map(|plugin| (name, plugin))
        })
    }

    pub fn weighted_destination_plugins(
        &mut self,
    ) -> impl Iterator<Item = (&'static str, &mut dyn WeightedDestinationPlugin)> + '_ {
        self.capable(Capability::WeightedDestination).filter_map(|entry| {
            let name = entry.plugin.name();
            entry.plugin.as_weighted_destination().map(|plugin| (name, plugin))
        })
    }
}

/// Built-in plugins in dispatch order.
pub fn default_plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(HealthCheckPlugin::default()),
        Box::new(ExtProcPlugin::default()),
        Box::new(CsrfPlugin::default()),
        Box::new(TapPlugin::default()),
    ]
}
