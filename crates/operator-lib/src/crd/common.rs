use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One instrumentation rule: the namespaces it applies to and the match strings
/// that select workloads inside them
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRule {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub match_string: Vec<String>,
}

/// Health and scope as self-reported by a running agent
///
/// The monitor lists are mandatory in the agent's response; instrumentation
/// fields are absent when instrumentation is disabled.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    pub ns_to_monitor: Vec<String>,
    pub ns_to_monitor_exclude: Vec<String>,
    pub nodes_to_monitor: Vec<String>,
    pub nodes_to_monitor_exclude: Vec<String>,
    #[serde(default)]
    pub ns_to_instrument: Vec<String>,
    #[serde(default)]
    pub ns_to_instrument_exclude: Vec<String>,
    #[serde(default)]
    pub instrument_rules: Vec<InstrumentRule>,
    #[serde(default)]
    pub instrument_match_string: Vec<String>,
}

/// Desired vs ready instance counts of a workload object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadReadiness {
    pub desired: i32,
    pub ready: i32,
}

impl WorkloadReadiness {
    pub fn is_ready(&self) -> bool {
        self.desired > 0 && self.ready >= self.desired
    }
}
