use super::{
    applied_state, now_rfc3339, owner_of, PassOutcome, Phase, Reconciler, ResourceKey,
    FAMILY_INFRAVIZ,
};
use crate::bundle;
use crate::crd::{InfraViz, InfraVizSpec, InfraVizStatus};
use crate::drift::{AppliedState, DriftInput};
use crate::error::Result;
use crate::filter::NameFilter;
use crate::resources::{selector_labels, ResourceManager, CONTROLLER_KEY_KEY};
use crate::settings::OperatorSettings;
use crate::store::ObjectStore;
use crate::workload::{daemon_set, workload_meta, LiveWorkload, ManagedWorkload, Workload};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, Pod, PodSpec, SecretKeySelector,
    Volume, VolumeMount,
};
use std::collections::BTreeMap;
use tracing::warn;

pub const INFRAVIZ_COMPONENT: &str = "infraviz";

const CONFIG_VOLUME: &str = "infraviz-config";
const CONFIG_DIR: &str = "/opt/machine-agent/conf";

fn infraviz_pod_spec(desired: &InfraVizSpec, settings: &OperatorSettings) -> PodSpec {
    let (bundle_name, bundle_key) = &settings.infraviz_bundle;
    let mut env = vec![EnvVar {
        name: "CONTROLLER_ACCESS_KEY".to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(settings.credential_secret_name.clone()),
                key: CONTROLLER_KEY_KEY.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];
    for var in &desired.env {
        match env.iter_mut().find(|e| e.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => env.push(var.clone()),
        }
    }

    PodSpec {
        containers: vec![Container {
            name: INFRAVIZ_COMPONENT.to_string(),
            image: Some(desired.image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            args: (!desired.args.is_empty()).then(|| desired.args.clone()),
            env: Some(env),
            resources: desired.resources.clone(),
            volume_mounts: Some(vec![VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: format!("{}/{}", CONFIG_DIR, bundle_key),
                sub_path: Some(bundle_key.clone()),
                ..Default::default()
            }]),
            ..Default::default()
        }],
        service_account_name: Some(desired.service_account_name.clone()),
        host_network: Some(true),
        host_pid: Some(true),
        node_selector: (!desired.node_selector.is_empty()).then(|| desired.node_selector.clone()),
        tolerations: (!desired.tolerations.is_empty()).then(|| desired.tolerations.clone()),
        volumes: Some(vec![Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(bundle_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Pod phase per node, limited to the nodes the agent is asked to cover
fn node_coverage(pods: &[Pod], filter: &NameFilter) -> BTreeMap<String, String> {
    pods.iter()
        .filter_map(|pod| {
            let node = pod.spec.as_ref()?.node_name.clone()?;
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            Some((node, phase))
        })
        .filter(|(node, _)| filter.admits(node))
        .collect()
}

impl<C: ObjectStore> Reconciler<C> {
    /// Reconcile one infrastructure visualisation desired-state object
    pub async fn reconcile_infraviz(&self, key: &ResourceKey) -> Result<PassOutcome> {
        self.run_pass(FAMILY_INFRAVIZ, key, self.infraviz_pass(key))
            .await
    }

    async fn infraviz_pass(&self, key: &ResourceKey) -> Result<PassOutcome> {
        let settings = self.settings();
        let ns = key.namespace.as_str();
        let rm = ResourceManager::new(self.store(), settings, ns);
        let (bundle_name, bundle_key) = &settings.infraviz_bundle;

        let Some(cr) = self.store().get::<InfraViz>(ns, &key.name).await? else {
            let removed = rm.remove_bundles(&[bundle_name.as_str()]).await;
            self.logger
                .log_cleanup(FAMILY_INFRAVIZ, ns, &key.name, &removed);
            return Ok(PassOutcome::absent());
        };

        let desired = cr.spec.with_defaults(settings);
        let nodes = NameFilter::new(&desired.nodes_to_monitor, &desired.nodes_to_monitor_exclude)?;
        let rendered = bundle::infraviz(&desired)?.to_string();

        let owner = owner_of(&cr)?;
        let credential = rm.ensure_credential().await?;
        self.note_placeholder(ns, credential.created);
        rm.ensure_text_bundle(&owner, bundle_name, bundle_key, rendered.clone())
            .await?;

        let annotation = AppliedState::new(desired.clone(), credential.revision.clone())
            .to_annotation()?;
        let labels = selector_labels(INFRAVIZ_COMPONENT, &key.name);
        let workload = Workload::new(
            self.store(),
            ns,
            labels.clone(),
            daemon_set(
                workload_meta(&key.name, ns, &owner, &labels, &annotation),
                &labels,
                infraviz_pod_spec(&desired, settings),
            ),
        )?;

        let mut outcome = PassOutcome {
            phase: Phase::Steady,
            verdict: None,
            requeue_after: Some(settings.requeue_delay),
            restarted: Vec::new(),
        };

        match self.store().get::<DaemonSet>(ns, &key.name).await? {
            None => {
                workload.create().await?;
                outcome.phase = Phase::Provisioning;
            }
            Some(existing) => {
                let live = LiveWorkload::of(&existing);
                let applied =
                    applied_state::<InfraVizSpec>(live.last_applied.as_deref(), &key.name);
                let was = applied.as_ref().map(|a| &a.spec);
                let prior_rendered = was.and_then(|spec| match bundle::infraviz(spec) {
                    Ok(doc) => Some(doc.to_string()),
                    Err(e) => {
                        warn!(
                            workload = %key.name,
                            error = %e,
                            "Cannot render bundle from last-applied state"
                        );
                        None
                    }
                });

                let mut input = DriftInput::new(&credential.revision)
                    .image(&desired.image, live.image.as_deref())
                    .resources(desired.resources.as_ref(), was.and_then(|s| s.resources.as_ref()))
                    .template("env", &desired.env, was.map(|s| &s.env))
                    .template("args", &desired.args, was.map(|s| &s.args))
                    .template("nodeSelector", &desired.node_selector, was.map(|s| &s.node_selector))
                    .template("tolerations", &desired.tolerations, was.map(|s| &s.tolerations))
                    .template(
                        "serviceAccountName",
                        &desired.service_account_name,
                        was.map(|s| &s.service_account_name),
                    )
                    .prior_revision(applied.as_ref().map(|a| a.credential_revision.as_str()));
                if let Some(prior) = &prior_rendered {
                    input = input.field("infravizBundle", &rendered, prior);
                }
                let classification = input.classify();
                self.logger
                    .log_verdict(FAMILY_INFRAVIZ, ns, &key.name, &classification);
                self.metrics
                    .inc_verdict(FAMILY_INFRAVIZ, classification.verdict.as_str());
                outcome.verdict = Some(classification.verdict);
                outcome.restarted = self
                    .converge(
                        FAMILY_INFRAVIZ,
                        ns,
                        &workload,
                        classification.verdict,
                        &annotation,
                    )
                    .await?;
            }
        }

        let pods: Vec<Pod> = self.store().list(ns, &labels).await?;
        let coverage = node_coverage(&pods, &nodes);
        let current = cr.status.as_ref().map(|s| &s.nodes);
        if current != Some(&coverage) {
            let status = InfraVizStatus {
                last_update_time: Some(now_rfc3339()),
                nodes: coverage,
            };
            self.persist_status(ns, &cr, |obj: &mut InfraViz| {
                obj.status = Some(status.clone());
            })
            .await?;
        }
        Ok(outcome)
    }
}
