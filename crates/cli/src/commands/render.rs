//! Offline preview of generated configuration bundles

use anyhow::{bail, Context, Result};
use colored::Colorize;
use operator_lib::crd::{ClusterAgent, ClusterCollector, InfraViz};
use operator_lib::{bundle, snapshot, OperatorSettings};
use serde::Serialize;
use std::path::Path;

use crate::output::OutputFormat;

/// Credential revision shown in previews; the real one is only known in-cluster
const PREVIEW_REVISION: &str = "<credential-revision>";

/// One generated bundle entry
#[derive(Debug, Serialize)]
pub struct RenderedBundle {
    pub config_map: String,
    pub key: String,
    pub content: String,
}

fn entry(target: &(String, String), content: String) -> RenderedBundle {
    RenderedBundle {
        config_map: target.0.clone(),
        key: target.1.clone(),
        content,
    }
}

/// Bundles the operator would write for a desired-state manifest
pub fn bundles_for(manifest: serde_json::Value, settings: &OperatorSettings) -> Result<Vec<RenderedBundle>> {
    let kind = manifest
        .get("kind")
        .and_then(|k| k.as_str())
        .context("Manifest has no kind")?
        .to_string();

    match kind.as_str() {
        "ClusterAgent" => {
            let cr: ClusterAgent = serde_json::from_value(manifest)?;
            let snap = snapshot::resolve(&cr.spec, None, PREVIEW_REVISION, settings.agent_server_port);
            Ok(vec![RenderedBundle {
                config_map: settings.agent_bundle_name.clone(),
                key: settings.agent_bundle_key.clone(),
                content: serde_json::to_string_pretty(&snap)?,
            }])
        }
        "ClusterCollector" => {
            let cr: ClusterCollector = serde_json::from_value(manifest)?;
            let spec = cr.spec.with_defaults(settings);
            Ok(vec![
                entry(
                    &settings.cluster_monitor_bundle,
                    bundle::cluster_monitor(&spec).to_string(),
                ),
                entry(&settings.infra_agent_bundle, bundle::infra_agent(&spec)?.to_string()),
                entry(
                    &settings.container_monitor_bundle,
                    bundle::container_monitor(&spec)?.to_string(),
                ),
                entry(
                    &settings.server_monitor_bundle,
                    bundle::server_monitor(&spec)?.to_string(),
                ),
            ])
        }
        "InfraViz" => {
            let cr: InfraViz = serde_json::from_value(manifest)?;
            let spec = cr.spec.with_defaults(settings);
            Ok(vec![entry(
                &settings.infraviz_bundle,
                bundle::infraviz(&spec)?.to_string(),
            )])
        }
        other => bail!("Unsupported kind {}", other),
    }
}

/// Print the bundles for the manifest at `path`
pub fn render_manifest(path: &Path, format: OutputFormat) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let manifest: serde_json::Value =
        serde_json::from_str(&raw).context("Manifest is not valid JSON")?;
    let bundles = bundles_for(manifest, &OperatorSettings::default())?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&bundles)?),
        OutputFormat::Table => {
            for b in &bundles {
                println!("{}", format!("# {}/{}", b.config_map, b.key).bold());
                println!("{}\n", b.content);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collector_manifest_renders_four_bundles() {
        let manifest = json!({
            "apiVersion": "monitoring.agents.dev/v1alpha1",
            "kind": "ClusterCollector",
            "metadata": {"name": "collector", "namespace": "monitoring"},
            "spec": {
                "controllerUrl": "https://controller.example.com",
                "account": "customer1",
                "clusterName": "prod"
            }
        });
        let bundles = bundles_for(manifest, &OperatorSettings::default()).unwrap();

        let keys: Vec<_> = bundles.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["clustermon.conf", "infra-agent.conf", "containermon.conf", "servermon.conf"]
        );
        assert!(bundles[0].content.contains("clusterName: prod"));
        assert!(bundles[1].content.contains("controller-port: 443"));
    }

    #[test]
    fn test_agent_manifest_renders_snapshot() {
        let manifest = json!({
            "apiVersion": "monitoring.agents.dev/v1alpha1",
            "kind": "ClusterAgent",
            "metadata": {"name": "agent"},
            "spec": {"controllerUrl": "http://controller:8090", "account": "customer1"}
        });
        let bundles = bundles_for(manifest, &OperatorSettings::default()).unwrap();

        assert_eq!(bundles.len(), 1);
        let snap: serde_json::Value = serde_json::from_str(&bundles[0].content).unwrap();
        assert_eq!(snap["controllerHost"], "controller");
        assert_eq!(snap["controllerPort"], 8090);
        assert_eq!(snap["agentServerPort"], 8989);
    }

    #[test]
    fn test_invalid_controller_url_is_reported() {
        let manifest = json!({
            "apiVersion": "monitoring.agents.dev/v1alpha1",
            "kind": "InfraViz",
            "metadata": {"name": "viz"},
            "spec": {"controllerUrl": "controller"}
        });
        assert!(bundles_for(manifest, &OperatorSettings::default()).is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let manifest = json!({"kind": "Deployment", "metadata": {"name": "x"}});
        let err = bundles_for(manifest, &OperatorSettings::default()).unwrap_err();
        assert!(err.to_string().contains("Unsupported kind"));
    }
}
