//! Desired-state overview

use anyhow::{Context, Result};
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};
use operator_lib::crd::{ClusterAgent, ClusterCollector, InfraViz, ObservedStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tabled::Tabled;

use crate::output::{color_readiness, format_timestamp, print_info, print_table, OutputFormat};

/// Row for the status table
#[derive(Tabled, Serialize)]
struct StatusRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Observed")]
    observed: String,
    #[tabled(rename = "Last Update")]
    last_update: String,
}

fn row<K: Resource<DynamicType = ()>>(object: &K, observed: String, last_update: Option<&str>) -> StatusRow {
    StatusRow {
        kind: K::kind(&()).to_string(),
        namespace: object.namespace().unwrap_or_default(),
        name: object.name_any(),
        observed,
        last_update: format_timestamp(last_update),
    }
}

/// One-line summary of what a primary agent reports it is watching
fn summarize_agent(state: Option<&ObservedStatus>) -> String {
    match state {
        None => "-".to_string(),
        Some(s) => {
            let mut parts = vec![format!("monitoring: {}", join_or_dash(&s.ns_to_monitor))];
            if !s.ns_to_instrument.is_empty() {
                parts.push(format!("instrumenting: {}", s.ns_to_instrument.join(",")));
            }
            parts.join("; ")
        }
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(",")
    }
}

fn agent_rows(items: &[ClusterAgent]) -> Vec<StatusRow> {
    items
        .iter()
        .map(|cr| {
            let status = cr.status.as_ref();
            row(
                cr,
                summarize_agent(status.and_then(|s| s.state.as_ref())),
                status.and_then(|s| s.last_update_time.as_deref()),
            )
        })
        .collect()
}

fn collector_rows(items: &[ClusterCollector]) -> Vec<StatusRow> {
    items
        .iter()
        .map(|cr| {
            let status = cr.status.as_ref();
            let observed = status
                .filter(|s| !s.collectors.is_empty())
                .map(|s| {
                    s.collectors
                        .iter()
                        .map(|(name, readiness)| format!("{} {}", name, color_readiness(readiness)))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_else(|| "-".to_string());
            row(cr, observed, status.and_then(|s| s.last_update_time.as_deref()))
        })
        .collect()
}

fn infraviz_rows(items: &[InfraViz]) -> Vec<StatusRow> {
    items
        .iter()
        .map(|cr| {
            let status = cr.status.as_ref();
            let observed = match status.map(|s| &s.nodes) {
                Some(nodes) if !nodes.is_empty() => {
                    let running = nodes.values().filter(|phase| *phase == "Running").count();
                    format!("{}/{} nodes running", running, nodes.len())
                }
                _ => "-".to_string(),
            };
            row(cr, observed, status.and_then(|s| s.last_update_time.as_deref()))
        })
        .collect()
}

async fn list<K>(client: &Client, namespace: Option<&str>) -> Result<Vec<K>>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
{
    let api: Api<K> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let list = api
        .list(&ListParams::default())
        .await
        .with_context(|| format!("Failed to list {}", K::plural(&())))?;
    Ok(list.items)
}

/// Show all desired-state objects with their observed status
pub async fn show_status(
    client: &Client,
    namespace: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let mut rows = agent_rows(&list::<ClusterAgent>(client, namespace).await?);
    rows.extend(collector_rows(&list::<ClusterCollector>(client, namespace).await?));
    rows.extend(infraviz_rows(&list::<InfraViz>(client, namespace).await?));

    if let OutputFormat::Table = format {
        print_info(&format!(
            "Desired state in {}",
            namespace.unwrap_or("all namespaces")
        ));
    }
    print_table(&rows, format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use operator_lib::crd::{ClusterAgentSpec, ClusterAgentStatus, InfraVizSpec, InfraVizStatus};
    use std::collections::BTreeMap;

    #[test]
    fn test_agent_summary() {
        assert_eq!(summarize_agent(None), "-");

        let state = ObservedStatus {
            ns_to_monitor: vec!["default".to_string(), "prod".to_string()],
            ns_to_instrument: vec!["prod".to_string()],
            ..Default::default()
        };
        assert_eq!(
            summarize_agent(Some(&state)),
            "monitoring: default,prod; instrumenting: prod"
        );
    }

    #[test]
    fn test_agent_row_reads_status() {
        let mut cr = ClusterAgent::new("agent", ClusterAgentSpec::default());
        cr.metadata.namespace = Some("monitoring".to_string());
        cr.status = Some(ClusterAgentStatus {
            last_update_time: Some("2024-03-01T10:15:30+00:00".to_string()),
            state: Some(ObservedStatus::default()),
        });

        let rows = agent_rows(&[cr]);
        assert_eq!(rows[0].kind, "ClusterAgent");
        assert_eq!(rows[0].namespace, "monitoring");
        assert_eq!(rows[0].observed, "monitoring: -");
        assert_eq!(rows[0].last_update, "2024-03-01 10:15:30");
    }

    #[test]
    fn test_infraviz_row_counts_running_nodes() {
        let mut cr = InfraViz::new("viz", InfraVizSpec::default());
        cr.status = Some(InfraVizStatus {
            last_update_time: None,
            nodes: BTreeMap::from([
                ("worker-1".to_string(), "Running".to_string()),
                ("worker-2".to_string(), "Pending".to_string()),
            ]),
        });

        let rows = infraviz_rows(&[cr]);
        assert_eq!(rows[0].observed, "1/2 nodes running");
        assert_eq!(rows[0].last_update, "-");
    }
}
