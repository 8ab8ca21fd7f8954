//! Resource identity and shared value types.

use envoy_types::pb::google::protobuf::Duration as ProtoDuration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to another resource by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }

    /// Deterministic Envoy cluster name for the referenced upstream.
    pub fn cluster_name(&self) -> String {
        format!("{}_{}", self.name, self.namespace)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Identity of a source resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.namespace.clone(), self.name.clone())
    }
}

/// Protobuf-style duration as written in resource definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DurationSpec {
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub nanos: i32,
}

impl DurationSpec {
    pub fn seconds(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    pub fn millis(millis: i64) -> Self {
        Self { seconds: millis / 1000, nanos: ((millis % 1000) * 1_000_000) as i32 }
    }

    pub fn to_proto(self) -> ProtoDuration {
        ProtoDuration { seconds: self.seconds, nanos: self.nanos }
    }
}

/// String matcher used by header and origin policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Suffix(String),
    SafeRegex(String),
    Contains(String),
}

/// Runtime-overridable fraction of requests a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFraction {
    pub numerator: u32,
    #[serde(default)]
    pub denominator: FractionDenominator,
    #[serde(default)]
    pub runtime_key: Option<String>,
}

impl RuntimeFraction {
    pub fn percent(numerator: u32) -> Self {
        Self { numerator, denominator: FractionDenominator::Hundred, runtime_key: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FractionDenominator {
    #[default]
    Hundred,
    TenThousand,
    Million,
}
