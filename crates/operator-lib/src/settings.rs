//! Operator-wide settings
//!
//! Fixed object names, default images and timing knobs. One instance is built at
//! startup and handed to every component; nothing here is looked up globally.

use std::time::Duration;

/// Resolved operator settings
#[derive(Debug, Clone)]
pub struct OperatorSettings {
    /// Credential secret shared by every agent family in a namespace
    pub credential_secret_name: String,

    /// Primary agent configuration bundle
    pub agent_bundle_name: String,
    pub agent_bundle_key: String,

    /// Collector configuration bundles (config map name, file key)
    pub cluster_monitor_bundle: (String, String),
    pub infra_agent_bundle: (String, String),
    pub container_monitor_bundle: (String, String),
    pub server_monitor_bundle: (String, String),

    /// Infrastructure visualisation bundle
    pub infraviz_bundle: (String, String),

    /// Config map that must exist before a custom trust store may be used
    pub trust_bundle_name: String,
    /// Config map holding custom agent TLS certificates when the user names none
    pub default_custom_ssl_config_map: String,

    pub default_agent_image: String,
    pub default_collector_image: String,
    pub default_host_collector_image: String,
    pub default_infraviz_image: String,

    /// Port the primary agent serves its self-status endpoint on
    pub agent_server_port: i32,
    /// Service account used when the desired state names none
    pub service_account_name: String,
    /// Cluster DNS suffix used to address in-cluster services
    pub cluster_domain: String,

    /// Fixed delay before a pass is re-invoked after a change
    pub requeue_delay: Duration,
    /// Budget for one self-status request
    pub status_timeout: Duration,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            credential_secret_name: "cluster-agent-secret".to_string(),
            agent_bundle_name: "cluster-agent-config".to_string(),
            agent_bundle_key: "cluster-agent-config.json".to_string(),
            cluster_monitor_bundle: (
                "cluster-collector-config".to_string(),
                "clustermon.conf".to_string(),
            ),
            infra_agent_bundle: ("infra-agent-config".to_string(), "infra-agent.conf".to_string()),
            container_monitor_bundle: (
                "container-collector-config".to_string(),
                "containermon.conf".to_string(),
            ),
            server_monitor_bundle: (
                "server-collector-config".to_string(),
                "servermon.conf".to_string(),
            ),
            infraviz_bundle: ("infra-viz-config".to_string(), "infraviz.conf".to_string()),
            trust_bundle_name: "agent-ssl-store".to_string(),
            default_custom_ssl_config_map: "cluster-agent-ssl-config".to_string(),
            default_agent_image: "monitoring/cluster-agent:latest".to_string(),
            default_collector_image: "monitoring/cluster-collector:latest".to_string(),
            default_host_collector_image: "monitoring/host-collector:latest".to_string(),
            default_infraviz_image: "monitoring/machine-agent:latest".to_string(),
            agent_server_port: 8989,
            service_account_name: "agent-operator".to_string(),
            cluster_domain: "cluster.local".to_string(),
            requeue_delay: Duration::from_secs(60),
            status_timeout: Duration::from_secs(10),
        }
    }
}

impl OperatorSettings {
    /// In-cluster DNS name of a service
    pub fn service_address(&self, service: &str, namespace: &str) -> String {
        format!("{}.{}.svc.{}", service, namespace, self.cluster_domain)
    }

    /// Names of every generated collector bundle, in render order
    pub fn collector_bundle_names(&self) -> [&str; 4] {
        [
            &self.cluster_monitor_bundle.0,
            &self.infra_agent_bundle.0,
            &self.container_monitor_bundle.0,
            &self.server_monitor_bundle.0,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_address_uses_cluster_domain() {
        let settings = OperatorSettings {
            cluster_domain: "example.internal".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.service_address("cluster-agent", "monitoring"),
            "cluster-agent.monitoring.svc.example.internal"
        );
    }

    #[test]
    fn test_default_requeue_delay() {
        let settings = OperatorSettings::default();
        assert_eq!(settings.requeue_delay, Duration::from_secs(60));
        assert_eq!(settings.agent_server_port, 8989);
    }
}
