//! Flat `key: value` configuration documents for the collector families
//!
//! Rendering is deterministic for a given (defaulted) spec, so re-rendering the
//! last-applied spec reproduces exactly what the running process was started with.

use crate::crd::{ClusterCollectorSpec, InfraVizSpec};
use crate::endpoint;
use crate::error::Result;
use std::fmt;

const TYPE_COLLECTOR: &str = "Collector";
const CLUSTER_MONITOR: &str = "Cluster Monitor";
const CLUSTER_MONITOR_PATH: &str = "./collectors/cluster-collector-linux-amd64";
const INFRA_AGENT: &str = "Infrastructure Agent";
const CONTAINER_MONITOR: &str = "Container Monitor";
const SERVER_MONITOR: &str = "Server Monitor";
const INFRA_VIZ: &str = "Infrastructure Visualization Agent";

/// Ordered `key: value` document
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlatDocument {
    entries: Vec<(&'static str, String)>,
}

impl FlatDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.entries.push((key, value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for FlatDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Version component of an image reference, `latest` when untagged
pub fn image_version(image: &str) -> &str {
    let name = image.split('@').next().unwrap_or(image);
    match name.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') && !tag.is_empty() => tag,
        _ => "latest",
    }
}

/// Cluster monitor configuration (`clustermon.conf`)
pub fn cluster_monitor(spec: &ClusterCollectorSpec) -> FlatDocument {
    FlatDocument::new()
        .with("name", CLUSTER_MONITOR)
        .with("type", TYPE_COLLECTOR)
        .with("version", image_version(&spec.image))
        .with("clusterName", &spec.cluster_name)
        .with("nsToMonitor", &spec.ns_to_monitor_regex)
        .with("nsToExclude", &spec.ns_to_exclude_regex)
        .with("clusterMonitoringEnabled", spec.cluster_mon_enabled.unwrap_or(true))
        .with("log-level", &spec.log_level)
        .with("path", CLUSTER_MONITOR_PATH)
        .with("enabled", true)
        .with("exporter-address", &spec.exporter_address)
        .with("exporter-port", spec.exporter_port.unwrap_or_default())
}

/// Infrastructure agent configuration (`infra-agent.conf`)
///
/// The controller access key is not part of the document; workloads read it from
/// the credential object.
pub fn infra_agent(spec: &ClusterCollectorSpec) -> Result<FlatDocument> {
    let ep = endpoint::parse(&spec.controller_url)?;
    let sys = &spec.system_configs;
    Ok(FlatDocument::new()
        .with("name", INFRA_AGENT)
        .with("controller-host", &ep.host)
        .with("controller-port", ep.port)
        .with("controller-account-name", &spec.account)
        .with("controller-ssl-enabled", ep.tls_flag())
        .with("enabled", true)
        .with("controller-lib-socket-url", &sys.collector_lib_socket_url)
        .with("collector-lib-port", &sys.collector_lib_port)
        .with("http-client-timeout", sys.http_client_timeout.unwrap_or_default())
        .with("http-client-basic-auth-enabled", sys.http_basic_auth_enabled)
        .with(
            "configuration-change-scan-period",
            sys.config_change_scan_period.unwrap_or_default(),
        )
        .with(
            "configuration-stale-grace-period",
            sys.config_stale_grace_period.unwrap_or_default(),
        )
        .with("debug-port", &sys.debug_port)
        .with("client-lib-send-url", &sys.client_lib_send_url)
        .with("client-lib-recv-url", &sys.client_lib_recv_url)
        .with("log-level", &sys.log_level)
        .with("debug-enabled", sys.debug_enabled))
}

fn host_monitor(
    spec: &ClusterCollectorSpec,
    name: &str,
    path: &str,
    dependency: &str,
) -> Result<FlatDocument> {
    let host = &spec.host_collector;
    let exporter = endpoint::parse(&host.container_metric_exporter_address)?;
    Ok(FlatDocument::new()
        .with("name", name)
        .with("type", TYPE_COLLECTOR)
        .with("version", image_version(&host.image))
        .with("path", path)
        .with("enabled", true)
        .with("exporter-address", &exporter.host)
        .with("exporter-port", exporter.port)
        .with("privileged", false)
        .with("dependency", dependency)
        .with("install-dependency", !dependency.is_empty())
        .with("log-level", &host.log_level))
}

/// Container monitor configuration (`containermon.conf`)
pub fn container_monitor(spec: &ClusterCollectorSpec) -> Result<FlatDocument> {
    let host = &spec.host_collector;
    host_monitor(
        spec,
        CONTAINER_MONITOR,
        &host.container_collector_path,
        &host.container_collector_dependency,
    )
}

/// Server monitor configuration (`servermon.conf`)
pub fn server_monitor(spec: &ClusterCollectorSpec) -> Result<FlatDocument> {
    let host = &spec.host_collector;
    host_monitor(
        spec,
        SERVER_MONITOR,
        &host.server_collector_path,
        &host.server_collector_dependency,
    )
}

/// Infrastructure visualisation agent configuration
pub fn infraviz(spec: &InfraVizSpec) -> Result<FlatDocument> {
    let ep = endpoint::parse(&spec.controller_url)?;
    Ok(FlatDocument::new()
        .with("name", INFRA_VIZ)
        .with("version", image_version(&spec.image))
        .with("controller-host", &ep.host)
        .with("controller-port", ep.port)
        .with("controller-ssl-enabled", ep.tls_flag())
        .with("controller-account-name", &spec.account)
        .with("global-account-name", &spec.global_account)
        .with("event-service-url", &spec.event_service_url)
        .with("enable-container-hostid", spec.enable_container_hostid)
        .with("enable-docker-viz", spec.enable_docker_viz)
        .with("log-level", &spec.log_level))
}
