use crate::settings::OperatorSettings;
use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of the infrastructure visualisation agent (one instance per node)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.agents.dev",
    version = "v1alpha1",
    kind = "InfraViz",
    namespaced,
    status = "InfraVizStatus",
    shortname = "iviz"
)]
#[serde(rename_all = "camelCase", default)]
pub struct InfraVizSpec {
    pub image: String,
    pub service_account_name: String,
    pub resources: Option<ResourceRequirements>,
    pub env: Vec<EnvVar>,
    pub args: Vec<String>,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,

    pub controller_url: String,
    pub account: String,
    pub global_account: String,
    pub event_service_url: String,

    pub enable_container_hostid: bool,
    pub enable_docker_viz: bool,
    pub log_level: String,

    pub nodes_to_monitor: Vec<String>,
    pub nodes_to_monitor_exclude: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfraVizStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    /// Pod phase per monitored node
    #[serde(default)]
    pub nodes: BTreeMap<String, String>,
}

impl InfraVizSpec {
    pub fn with_defaults(&self, settings: &OperatorSettings) -> Self {
        let mut spec = self.clone();
        if spec.image.is_empty() {
            spec.image = settings.default_infraviz_image.clone();
        }
        if spec.service_account_name.is_empty() {
            spec.service_account_name = settings.service_account_name.clone();
        }
        if spec.log_level.is_empty() {
            spec.log_level = "info".to_string();
        }
        spec
    }
}
