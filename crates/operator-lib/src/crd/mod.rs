//! Desired-state custom resources
//!
//! One resource per agent family. The cluster collector resource drives two
//! workloads (the cluster collector and the per-node host collector).

mod cluster_agent;
mod cluster_collector;
mod common;
mod infra_viz;

pub use cluster_agent::{ClusterAgent, ClusterAgentSpec, ClusterAgentStatus};
pub use cluster_collector::{
    ClusterCollector, ClusterCollectorSpec, ClusterCollectorStatus, HostCollectorSpec,
    SystemConfigs,
};
pub use common::{InstrumentRule, ObservedStatus, WorkloadReadiness};
pub use infra_viz::{InfraViz, InfraVizSpec, InfraVizStatus};

/// API group shared by every desired-state kind
pub const API_GROUP: &str = "monitoring.agents.dev";
