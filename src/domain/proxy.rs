//! Proxies, listeners, virtual hosts and routes.

use serde::{Deserialize, Serialize};

use super::metadata::{Metadata, ResourceRef};
use super::policy::{CsrfPolicy, ExtProcRouteSettings, ListenerExtProc, TapConfig};

/// A gateway proxy instance and the listeners it serves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Proxy {
    pub metadata: Metadata,
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub bind_port: u32,
    #[serde(default)]
    pub http: HttpListener,
}

fn default_bind_address() -> String {
    "::".to_string()
}

impl Listener {
    pub fn new(name: impl Into<String>, bind_port: u32) -> Self {
        Self {
            name: name.into(),
            bind_address: default_bind_address(),
            bind_port,
            http: HttpListener::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpListener {
    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHost>,
    #[serde(default)]
    pub options: HttpListenerOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpListenerOptions {
    pub ext_proc: Option<ListenerExtProc>,
    pub csrf: Option<CsrfPolicy>,
    pub tap: Option<TapConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub options: VirtualHostOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualHostOptions {
    pub ext_proc: Option<ExtProcRouteSettings>,
    pub csrf: Option<CsrfPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub matchers: Vec<RouteMatcher>,
    pub action: RouteAction,
    #[serde(default)]
    pub options: RouteOptions,
}

impl Route {
    /// Route to a single upstream matching `prefix`.
    pub fn to_upstream(prefix: impl Into<String>, upstream: ResourceRef) -> Self {
        Self {
            name: None,
            matchers: vec![RouteMatcher::Prefix(prefix.into())],
            action: RouteAction::Upstream(upstream),
            options: RouteOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMatcher {
    Prefix(String),
    Exact(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Upstream(ResourceRef),
    Weighted(Vec<WeightedDestination>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    pub ext_proc: Option<ExtProcRouteSettings>,
    pub csrf: Option<CsrfPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedDestination {
    pub upstream: ResourceRef,
    pub weight: u32,
    #[serde(default)]
    pub options: WeightedDestinationOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightedDestinationOptions {
    pub csrf: Option<CsrfPolicy>,
}
