//! Filter stage resolver.
//!
//! Every contributed HTTP filter names a coarse stage plus a predicate
//! relative to it. Filters sort on `rank * 2 + offset` (before = -1,
//! during = 0, after = +1), then on weight, then on name, which yields a
//! total order that does not depend on contribution order.

use std::collections::HashMap;
use std::fmt;

use envoy_types::pb::google::protobuf::Any;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DuplicateFilterPolicy;
use crate::errors::{Error, Result};

/// Canonically ordered filter stages, earliest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WellKnownStage {
    #[serde(rename = "fault")]
    Fault,
    #[serde(rename = "cors")]
    Cors,
    #[serde(rename = "waf")]
    Waf,
    #[serde(rename = "authn")]
    AuthN,
    #[serde(rename = "authz")]
    AuthZ,
    #[serde(rename = "rate_limit")]
    RateLimit,
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "out_auth")]
    OutAuth,
    #[serde(rename = "route")]
    Route,
}

impl WellKnownStage {
    pub const ALL: [WellKnownStage; 9] = [
        WellKnownStage::Fault,
        WellKnownStage::Cors,
        WellKnownStage::Waf,
        WellKnownStage::AuthN,
        WellKnownStage::AuthZ,
        WellKnownStage::RateLimit,
        WellKnownStage::Accepted,
        WellKnownStage::OutAuth,
        WellKnownStage::Route,
    ];

    pub fn rank(self) -> i64 {
        self as i64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WellKnownStage::Fault => "fault",
            WellKnownStage::Cors => "cors",
            WellKnownStage::Waf => "waf",
            WellKnownStage::AuthN => "authn",
            WellKnownStage::AuthZ => "authz",
            WellKnownStage::RateLimit => "rate_limit",
            WellKnownStage::Accepted => "accepted",
            WellKnownStage::OutAuth => "out_auth",
            WellKnownStage::Route => "route",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePredicate {
    Before,
    During,
    After,
}

impl StagePredicate {
    fn offset(self) -> i64 {
        match self {
            StagePredicate::Before => -1,
            StagePredicate::During => 0,
            StagePredicate::After => 1,
        }
    }
}

/// Position of a filter relative to a well-known stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterStage {
    pub stage: WellKnownStage,
    pub predicate: StagePredicate,
}

impl FilterStage {
    pub const fn before(stage: WellKnownStage) -> Self {
        Self { stage, predicate: StagePredicate::Before }
    }

    pub const fn during(stage: WellKnownStage) -> Self {
        Self { stage, predicate: StagePredicate::During }
    }

    pub const fn after(stage: WellKnownStage) -> Self {
        Self { stage, predicate: StagePredicate::After }
    }

    /// Primary sort key. `after(N)` and `before(N + 1)` share a slot.
    pub fn slot(&self) -> i64 {
        self.stage.rank() * 2 + self.predicate.offset()
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let predicate = match self.predicate {
            StagePredicate::Before => "before",
            StagePredicate::During => "during",
            StagePredicate::After => "after",
        };
        write!(f, "{}({})", predicate, self.stage.as_str())
    }
}

/// A filter contributed by a plugin, waiting to be placed in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedFilter {
    pub name: String,
    pub typed_config: Any,
    pub stage: FilterStage,
    pub weight: i32,
}

impl StagedFilter {
    pub fn new(name: impl Into<String>, typed_config: Any, stage: FilterStage) -> Self {
        Self { name: name.into(), typed_config, stage, weight: 0 }
    }

    /// Build a filter whose stage comes from user configuration; a missing stage is an error.
    pub fn with_configured_stage(
        name: impl Into<String>,
        typed_config: Any,
        stage: Option<FilterStage>,
    ) -> Result<Self> {
        let name = name.into();
        let stage = stage.ok_or_else(|| {
            Error::validation_field(format!("filter '{}' has no filter stage configured", name), "filter_stage")
        })?;
        Ok(Self::new(name, typed_config, stage))
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}

/// Produce the deterministic chain order for `filters`.
///
/// `filters` is in contribution order; under [`DuplicateFilterPolicy::LastWriterWins`]
/// a repeated name replaces the earlier entry, under `Reject` it is an error.
pub fn order_filters(
    filters: Vec<StagedFilter>,
    policy: DuplicateFilterPolicy,
) -> Result<Vec<StagedFilter>> {
    let mut unique: Vec<StagedFilter> = Vec::with_capacity(filters.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for filter in filters {
        match positions.get(&filter.name) {
            Some(&index) => match policy {
                DuplicateFilterPolicy::Reject => {
                    return Err(Error::config(format!(
                        "filter '{}' contributed more than once ({} and {})",
                        filter.name, unique[index].stage, filter.stage
                    )));
                }
                DuplicateFilterPolicy::LastWriterWins => {
                    debug!(
                        filter = %filter.name,
                        replaced_stage = %unique[index].stage,
                        stage = %filter.stage,
                        "Later filter contribution replaces earlier one"
                    );
                    unique[index] = filter;
                }
            },
            None => {
                positions.insert(filter.name.clone(), unique.len());
                unique.push(filter);
            }
        }
    }

    unique.sort_by(|a, b| {
        a.stage
            .slot()
            .cmp(&b.stage.slot())
            .then(a.weight.cmp(&b.weight))
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(unique)
}
