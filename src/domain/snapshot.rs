//! Global settings and the input snapshot seen by one translation pass.

use serde::{Deserialize, Serialize};

use super::metadata::ResourceRef;
use super::policy::{CsrfPolicy, ExtProcSettings};
use super::proxy::Proxy;
use super::upstream::Upstream;
use crate::errors::{Error, Result};

/// Process-wide settings captured by plugins at initialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ext_proc: Option<ExtProcSettings>,
    pub csrf: Option<CsrfPolicy>,
}

/// Full input resource set visible to one translation pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSnapshot {
    pub upstreams: Vec<Upstream>,
    pub proxies: Vec<Proxy>,
}

impl ApiSnapshot {
    pub fn with_upstreams(upstreams: Vec<Upstream>) -> Self {
        Self { upstreams, proxies: Vec::new() }
    }

    /// Resolve an upstream reference against the snapshot.
    pub fn find_upstream(&self, reference: &ResourceRef) -> Result<&Upstream> {
        self.upstreams
            .iter()
            .find(|upstream| {
                upstream.metadata.name == reference.name
                    && upstream.metadata.namespace == reference.namespace
            })
            .ok_or_else(|| Error::not_found("upstream", reference.to_string()))
    }

    pub fn find_proxy(&self, namespace: &str, name: &str) -> Result<&Proxy> {
        self.proxies
            .iter()
            .find(|proxy| proxy.metadata.name == name && proxy.metadata.namespace == namespace)
            .ok_or_else(|| Error::not_found("proxy", format!("{namespace}.{name}")))
    }
}
