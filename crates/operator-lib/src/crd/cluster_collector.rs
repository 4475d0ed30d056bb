use crate::settings::OperatorSettings;
use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::WorkloadReadiness;

/// Desired state of the cluster collector and its per-node host collector
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.agents.dev",
    version = "v1alpha1",
    kind = "ClusterCollector",
    namespaced,
    status = "ClusterCollectorStatus",
    shortname = "ccollector"
)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterCollectorSpec {
    pub image: String,
    pub service_account_name: String,
    pub resources: Option<ResourceRequirements>,

    pub controller_url: String,
    pub account: String,
    pub cluster_name: String,
    pub ns_to_monitor_regex: String,
    pub ns_to_exclude_regex: String,
    pub cluster_mon_enabled: Option<bool>,
    pub log_level: String,
    pub exporter_address: String,
    pub exporter_port: Option<i32>,

    pub system_configs: SystemConfigs,
    pub host_collector: HostCollectorSpec,
}

/// Infrastructure agent tuning shared by both collector workloads
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemConfigs {
    pub collector_lib_socket_url: String,
    pub collector_lib_port: String,
    pub http_client_timeout: Option<u32>,
    pub http_basic_auth_enabled: bool,
    pub config_change_scan_period: Option<u32>,
    pub config_stale_grace_period: Option<u32>,
    pub debug_port: String,
    pub client_lib_send_url: String,
    pub client_lib_recv_url: String,
    pub log_level: String,
    pub debug_enabled: bool,
}

/// Per-node host collector settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HostCollectorSpec {
    pub image: String,
    pub resources: Option<ResourceRequirements>,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub container_metric_exporter_address: String,
    pub container_collector_path: String,
    pub container_collector_dependency: String,
    pub server_collector_path: String,
    pub server_collector_dependency: String,
    pub log_level: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCollectorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    /// Readiness per managed workload object, keyed by object name
    #[serde(default)]
    pub collectors: BTreeMap<String, WorkloadReadiness>,
}

fn fill(value: &mut String, default: &str) {
    if value.is_empty() {
        *value = default.to_string();
    }
}

impl ClusterCollectorSpec {
    /// Copy of the spec with every unset field replaced by its default
    pub fn with_defaults(&self, settings: &OperatorSettings) -> Self {
        let mut spec = self.clone();
        fill(&mut spec.image, &settings.default_collector_image);
        fill(&mut spec.service_account_name, &settings.service_account_name);
        fill(&mut spec.log_level, "info");
        fill(&mut spec.exporter_address, "127.0.0.1");
        spec.exporter_port.get_or_insert(9100);
        spec.cluster_mon_enabled.get_or_insert(true);

        let sys = &mut spec.system_configs;
        fill(&mut sys.collector_lib_socket_url, "tcp://127.0.0.1");
        fill(&mut sys.collector_lib_port, "8090");
        sys.http_client_timeout.get_or_insert(30);
        sys.config_change_scan_period.get_or_insert(10);
        sys.config_stale_grace_period.get_or_insert(300);
        fill(&mut sys.debug_port, "9999");
        fill(&mut sys.client_lib_send_url, "tcp://127.0.0.1:8091");
        fill(&mut sys.client_lib_recv_url, "tcp://127.0.0.1:8092");
        fill(&mut sys.log_level, "info");

        let host = &mut spec.host_collector;
        fill(&mut host.image, &settings.default_host_collector_image);
        fill(&mut host.container_metric_exporter_address, "http://127.0.0.1:9100");
        fill(
            &mut host.container_collector_path,
            "./collectors/container-monitor-linux-amd64",
        );
        fill(
            &mut host.server_collector_path,
            "./collectors/server-monitor-linux-amd64",
        );
        fill(&mut host.log_level, "info");
        spec
    }
}
