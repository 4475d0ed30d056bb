use super::common::{InstrumentRule, ObservedStatus};
use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of the primary cluster agent
///
/// Every field is optional; empty values fall back to operator defaults.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.agents.dev",
    version = "v1alpha1",
    kind = "ClusterAgent",
    namespaced,
    status = "ClusterAgentStatus",
    shortname = "cagent",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Last Update","type":"string","jsonPath":".status.lastUpdateTime"}"#
)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterAgentSpec {
    pub image: String,
    pub service_account_name: String,
    pub replicas: Option<i32>,
    pub resources: Option<ResourceRequirements>,
    pub env: Vec<EnvVar>,
    pub args: Vec<String>,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,

    pub controller_url: String,
    pub account: String,
    pub global_account: String,
    pub app_name: String,
    pub event_service_url: String,

    /// Certificate the agent trusts when talking to the controller
    pub system_ssl_cert: String,
    /// Certificate file mounted from the custom TLS config map
    pub agent_ssl_cert: String,
    /// Trust store name; requires the trust bundle config map to exist
    pub agent_ssl_store_name: String,
    pub custom_ssl_config_map: String,

    pub ns_to_monitor: Vec<String>,
    pub ns_to_monitor_exclude: Vec<String>,
    pub nodes_to_monitor: Vec<String>,
    pub nodes_to_monitor_exclude: Vec<String>,

    pub ns_to_instrument: Vec<String>,
    pub ns_to_instrument_exclude: Vec<String>,
    pub instrument_rules: Vec<InstrumentRule>,
    pub instrument_match_string: Vec<String>,

    pub log_level: String,
    pub agent_server_port: Option<i32>,
    pub metrics_sync_interval: Option<u32>,
    pub snapshot_sync_interval: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAgentStatus {
    /// RFC 3339 timestamp of the last successful status write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ObservedStatus>,
}
