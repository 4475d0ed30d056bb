//! Configuration snapshot of the primary agent
//!
//! The snapshot is the fully resolved configuration handed to the agent through its
//! generated bundle. It is recomputed on every pass, and the copy persisted in the
//! bundle is the only durable record of what the agent was last configured with.

use crate::crd::{ClusterAgentSpec, InstrumentRule};
use crate::endpoint;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Canonical, fully-resolved agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub app_name: String,
    pub controller_url: String,
    pub controller_host: String,
    pub controller_port: u16,
    pub controller_ssl_enabled: bool,
    pub account: String,
    pub global_account: String,
    pub event_service_url: String,
    pub system_ssl_cert: String,
    pub agent_ssl_cert: String,
    pub agent_ssl_store_name: String,

    pub ns_to_monitor: Vec<String>,
    pub ns_to_monitor_exclude: Vec<String>,
    pub nodes_to_monitor: Vec<String>,
    pub nodes_to_monitor_exclude: Vec<String>,

    pub ns_to_instrument: Vec<String>,
    pub ns_to_instrument_exclude: Vec<String>,
    pub instrument_rules: Vec<InstrumentRule>,
    pub instrument_match_string: Vec<String>,

    pub log_level: String,
    pub agent_server_port: i32,
    pub metrics_sync_interval: u32,
    pub snapshot_sync_interval: u32,

    /// Revision of the credential object this snapshot was resolved against
    pub secret_version: String,
    /// Instrumentation settings differ from the previous snapshot
    pub instrumentation_updated: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            app_name: "k8s-cluster".to_string(),
            controller_url: String::new(),
            controller_host: String::new(),
            controller_port: 0,
            controller_ssl_enabled: false,
            account: String::new(),
            global_account: String::new(),
            event_service_url: String::new(),
            system_ssl_cert: String::new(),
            agent_ssl_cert: String::new(),
            agent_ssl_store_name: String::new(),
            ns_to_monitor: vec!["default".to_string()],
            ns_to_monitor_exclude: Vec::new(),
            nodes_to_monitor: Vec::new(),
            nodes_to_monitor_exclude: Vec::new(),
            ns_to_instrument: Vec::new(),
            ns_to_instrument_exclude: Vec::new(),
            instrument_rules: Vec::new(),
            instrument_match_string: Vec::new(),
            log_level: "INFO".to_string(),
            agent_server_port: 8989,
            metrics_sync_interval: 30,
            snapshot_sync_interval: 15,
            secret_version: String::new(),
            instrumentation_updated: false,
        }
    }
}

fn overlay_str(target: &mut String, value: &str) {
    if !value.is_empty() {
        *target = value.to_string();
    }
}

fn overlay_list<T: Clone>(target: &mut Vec<T>, value: &[T]) {
    if !value.is_empty() {
        *target = value.to_vec();
    }
}

/// Build the snapshot for a desired state
///
/// Starts from the defaults (with the operator's server port), overlays every
/// non-empty desired field and stamps the credential revision. Never fails: an
/// unparsable controller URL leaves the host/port/TLS triple unset.
pub fn resolve(
    desired: &ClusterAgentSpec,
    prior: Option<&ConfigSnapshot>,
    credential_revision: &str,
    default_server_port: i32,
) -> ConfigSnapshot {
    let mut snap = ConfigSnapshot {
        agent_server_port: default_server_port,
        ..Default::default()
    };

    overlay_str(&mut snap.app_name, &desired.app_name);
    overlay_str(&mut snap.controller_url, &desired.controller_url);
    overlay_str(&mut snap.account, &desired.account);
    overlay_str(&mut snap.global_account, &desired.global_account);
    overlay_str(&mut snap.event_service_url, &desired.event_service_url);
    overlay_str(&mut snap.system_ssl_cert, &desired.system_ssl_cert);
    overlay_str(&mut snap.agent_ssl_cert, &desired.agent_ssl_cert);
    overlay_str(&mut snap.agent_ssl_store_name, &desired.agent_ssl_store_name);
    overlay_str(&mut snap.log_level, &desired.log_level);

    overlay_list(&mut snap.ns_to_monitor, &desired.ns_to_monitor);
    overlay_list(&mut snap.ns_to_monitor_exclude, &desired.ns_to_monitor_exclude);
    overlay_list(&mut snap.nodes_to_monitor, &desired.nodes_to_monitor);
    overlay_list(&mut snap.nodes_to_monitor_exclude, &desired.nodes_to_monitor_exclude);
    overlay_list(&mut snap.ns_to_instrument, &desired.ns_to_instrument);
    overlay_list(&mut snap.ns_to_instrument_exclude, &desired.ns_to_instrument_exclude);
    overlay_list(&mut snap.instrument_rules, &desired.instrument_rules);
    overlay_list(&mut snap.instrument_match_string, &desired.instrument_match_string);

    if let Some(port) = desired.agent_server_port.filter(|p| *p > 0) {
        snap.agent_server_port = port;
    }
    if let Some(secs) = desired.metrics_sync_interval.filter(|s| *s > 0) {
        snap.metrics_sync_interval = secs;
    }
    if let Some(secs) = desired.snapshot_sync_interval.filter(|s| *s > 0) {
        snap.snapshot_sync_interval = secs;
    }

    if let Ok(ep) = endpoint::parse(&snap.controller_url) {
        snap.controller_host = ep.host;
        snap.controller_port = ep.port;
        snap.controller_ssl_enabled = ep.tls;
    }

    snap.secret_version = credential_revision.to_string();
    snap.instrumentation_updated = prior
        .map(|p| p.instrumentation_differs(&snap))
        .unwrap_or(false);
    snap
}

impl ConfigSnapshot {
    fn instrumentation_differs(&self, other: &ConfigSnapshot) -> bool {
        self.ns_to_instrument != other.ns_to_instrument
            || self.ns_to_instrument_exclude != other.ns_to_instrument_exclude
            || self.instrument_rules != other.instrument_rules
            || self.instrument_match_string != other.instrument_match_string
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
