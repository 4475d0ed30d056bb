use super::{
    applied_state, now_rfc3339, owner_of, PassOutcome, Phase, Reconciler, ResourceKey,
    FAMILY_COLLECTOR,
};
use crate::bundle;
use crate::crd::{ClusterCollector, ClusterCollectorSpec, ClusterCollectorStatus, WorkloadReadiness};
use crate::drift::{AppliedState, Classification, DriftInput};
use crate::error::Result;
use crate::filter;
use crate::resources::{selector_labels, ResourceManager, CONTROLLER_KEY_KEY};
use crate::settings::OperatorSettings;
use crate::store::ObjectStore;
use crate::workload::{
    daemon_set, deployment, workload_meta, LiveWorkload, ManagedWorkload, Workload, WorkloadShape,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PodSpec, ResourceRequirements,
    SecretKeySelector, Volume, VolumeMount,
};
use std::collections::BTreeMap;
use tracing::warn;

pub const CLUSTER_COLLECTOR_COMPONENT: &str = "cluster-collector";
pub const HOST_COLLECTOR_COMPONENT: &str = "host-collector";

const CONF_DIR: &str = "/opt/collector/conf";

/// The four rendered collector documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorBundles {
    pub cluster_monitor: String,
    pub infra_agent: String,
    pub container_monitor: String,
    pub server_monitor: String,
}

impl CollectorBundles {
    pub fn render(spec: &ClusterCollectorSpec) -> Result<Self> {
        Ok(Self {
            cluster_monitor: bundle::cluster_monitor(spec).to_string(),
            infra_agent: bundle::infra_agent(spec)?.to_string(),
            container_monitor: bundle::container_monitor(spec)?.to_string(),
            server_monitor: bundle::server_monitor(spec)?.to_string(),
        })
    }

    /// (config map name, file key, content) in render order
    pub fn entries<'a>(&'a self, settings: &'a OperatorSettings) -> [(&'a str, &'a str, &'a str); 4] {
        let entry = |bundle: &'a (String, String), content: &'a String| {
            (bundle.0.as_str(), bundle.1.as_str(), content.as_str())
        };
        [
            entry(&settings.cluster_monitor_bundle, &self.cluster_monitor),
            entry(&settings.infra_agent_bundle, &self.infra_agent),
            entry(&settings.container_monitor_bundle, &self.container_monitor),
            entry(&settings.server_monitor_bundle, &self.server_monitor),
        ]
    }
}

fn file_of(bundle: &(String, String)) -> (&str, &str) {
    (bundle.0.as_str(), bundle.1.as_str())
}

fn host_collector_name(name: &str) -> String {
    format!("{}-host-collector", name)
}

fn access_key_env(secret_name: &str) -> EnvVar {
    EnvVar {
        name: "CONTROLLER_ACCESS_KEY".to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret_name.to_string()),
                key: CONTROLLER_KEY_KEY.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mount each bundle file individually under the collector config directory
fn bundle_mounts(bundles: &[(&str, &str)]) -> (Vec<VolumeMount>, Vec<Volume>) {
    bundles
        .iter()
        .map(|(map_name, key)| {
            (
                VolumeMount {
                    name: map_name.to_string(),
                    mount_path: format!("{}/{}", CONF_DIR, key),
                    sub_path: Some(key.to_string()),
                    ..Default::default()
                },
                Volume {
                    name: map_name.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: Some(map_name.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
        })
        .unzip()
}

fn collector_pod_spec(
    component: &str,
    image: &str,
    resources: Option<ResourceRequirements>,
    service_account: &str,
    bundles: &[(&str, &str)],
    settings: &OperatorSettings,
) -> PodSpec {
    let (mounts, volumes) = bundle_mounts(bundles);
    PodSpec {
        containers: vec![Container {
            name: component.to_string(),
            image: Some(image.to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            env: Some(vec![access_key_env(&settings.credential_secret_name)]),
            resources,
            volume_mounts: Some(mounts),
            ..Default::default()
        }],
        service_account_name: Some(service_account.to_string()),
        volumes: Some(volumes),
        ..Default::default()
    }
}

/// Render the bundles a collector workload was last built from
///
/// A rendering failure is logged and treated as an unknown prior, which skips
/// the bundle checks instead of forcing a restart on every pass.
fn prior_bundles(
    applied: Option<&AppliedState<ClusterCollectorSpec>>,
    workload: &str,
) -> Option<CollectorBundles> {
    let applied = applied?;
    match CollectorBundles::render(&applied.spec) {
        Ok(bundles) => Some(bundles),
        Err(e) => {
            warn!(workload, error = %e, "Cannot render bundles from last-applied state");
            None
        }
    }
}

/// Add bundle checks whose prior rendering is known
///
/// Bundles are mounted by sub-path and never re-read, so a changed rendering is
/// a restart reason just like a rotated credential.
fn with_bundles<'a>(
    mut input: DriftInput<'a>,
    bundles: &[(&'static str, &'a str, Option<&'a str>)],
) -> DriftInput<'a> {
    for &(name, desired, prior) in bundles {
        if let Some(prior) = prior {
            input = input.field(name, desired, prior);
        }
    }
    input
}

impl<C: ObjectStore> Reconciler<C> {
    /// Reconcile one collector desired-state object (cluster and host collector)
    pub async fn reconcile_collector(&self, key: &ResourceKey) -> Result<PassOutcome> {
        self.run_pass(FAMILY_COLLECTOR, key, self.collector_pass(key))
            .await
    }

    async fn collector_pass(&self, key: &ResourceKey) -> Result<PassOutcome> {
        let settings = self.settings();
        let ns = key.namespace.as_str();
        let rm = ResourceManager::new(self.store(), settings, ns);

        let Some(cr) = self.store().get::<ClusterCollector>(ns, &key.name).await? else {
            let removed = rm.remove_bundles(&settings.collector_bundle_names()).await;
            self.logger
                .log_cleanup(FAMILY_COLLECTOR, ns, &key.name, &removed);
            return Ok(PassOutcome::absent());
        };

        let desired = cr.spec.with_defaults(settings);
        filter::validate_regex(&desired.ns_to_monitor_regex)?;
        filter::validate_regex(&desired.ns_to_exclude_regex)?;
        let rendered = CollectorBundles::render(&desired)?;

        let owner = owner_of(&cr)?;
        let credential = rm.ensure_credential().await?;
        self.note_placeholder(ns, credential.created);
        for (name, file, content) in rendered.entries(settings) {
            rm.ensure_text_bundle(&owner, name, file, content.to_string())
                .await?;
        }

        let annotation = AppliedState::new(desired.clone(), credential.revision.clone())
            .to_annotation()?;

        let cluster_labels = selector_labels(CLUSTER_COLLECTOR_COMPONENT, &key.name);
        let cluster = Workload::new(
            self.store(),
            ns,
            cluster_labels.clone(),
            deployment(
                workload_meta(&key.name, ns, &owner, &cluster_labels, &annotation),
                &cluster_labels,
                1,
                collector_pod_spec(
                    CLUSTER_COLLECTOR_COMPONENT,
                    &desired.image,
                    desired.resources.clone(),
                    &desired.service_account_name,
                    &[
                        file_of(&settings.cluster_monitor_bundle),
                        file_of(&settings.infra_agent_bundle),
                    ],
                    settings,
                ),
            ),
        )?;

        let host = &desired.host_collector;
        let host_name = host_collector_name(&key.name);
        let host_labels = selector_labels(HOST_COLLECTOR_COMPONENT, &key.name);
        let mut host_pod = collector_pod_spec(
            HOST_COLLECTOR_COMPONENT,
            &host.image,
            host.resources.clone(),
            &desired.service_account_name,
            &[
                file_of(&settings.infra_agent_bundle),
                file_of(&settings.container_monitor_bundle),
                file_of(&settings.server_monitor_bundle),
            ],
            settings,
        );
        host_pod.node_selector = (!host.node_selector.is_empty()).then(|| host.node_selector.clone());
        host_pod.tolerations = (!host.tolerations.is_empty()).then(|| host.tolerations.clone());
        let host_workload = Workload::new(
            self.store(),
            ns,
            host_labels.clone(),
            daemon_set(
                workload_meta(&host_name, ns, &owner, &host_labels, &annotation),
                &host_labels,
                host_pod,
            ),
        )?;

        let live_cluster = self.store().get::<Deployment>(ns, &key.name).await?;
        let live_host = self.store().get::<DaemonSet>(ns, &host_name).await?;

        let mut outcome = PassOutcome {
            phase: Phase::Steady,
            verdict: None,
            requeue_after: Some(settings.requeue_delay),
            restarted: Vec::new(),
        };

        let cluster_check = live_cluster.as_ref().map(LiveWorkload::of).map(|live| {
            let applied =
                applied_state::<ClusterCollectorSpec>(live.last_applied.as_deref(), &key.name);
            let prior = prior_bundles(applied.as_ref(), &key.name);
            let was = applied.as_ref().map(|a| &a.spec);
            let input = DriftInput::new(&credential.revision)
                .image(&desired.image, live.image.as_deref())
                .resources(
                    desired.resources.as_ref(),
                    was.and_then(|s| s.resources.as_ref()),
                )
                .template(
                    "serviceAccountName",
                    &desired.service_account_name,
                    was.map(|s| &s.service_account_name),
                )
                .prior_revision(applied.as_ref().map(|a| a.credential_revision.as_str()));
            with_bundles(
                input,
                &[
                    (
                        "clusterMonitorBundle",
                        rendered.cluster_monitor.as_str(),
                        prior.as_ref().map(|p| p.cluster_monitor.as_str()),
                    ),
                    (
                        "infraAgentBundle",
                        rendered.infra_agent.as_str(),
                        prior.as_ref().map(|p| p.infra_agent.as_str()),
                    ),
                ],
            )
            .classify()
        });
        self.converge_collector(ns, &key.name, &cluster, cluster_check, &annotation, &mut outcome)
            .await?;

        let host_check = live_host.as_ref().map(LiveWorkload::of).map(|live| {
            let applied =
                applied_state::<ClusterCollectorSpec>(live.last_applied.as_deref(), &host_name);
            let prior = prior_bundles(applied.as_ref(), &host_name);
            let was = applied.as_ref().map(|a| &a.spec);
            let was_host = was.map(|s| &s.host_collector);
            let input = DriftInput::new(&credential.revision)
                .image(&host.image, live.image.as_deref())
                .resources(
                    host.resources.as_ref(),
                    was_host.and_then(|h| h.resources.as_ref()),
                )
                .template("nodeSelector", &host.node_selector, was_host.map(|h| &h.node_selector))
                .template("tolerations", &host.tolerations, was_host.map(|h| &h.tolerations))
                .template(
                    "serviceAccountName",
                    &desired.service_account_name,
                    was.map(|s| &s.service_account_name),
                )
                .prior_revision(applied.as_ref().map(|a| a.credential_revision.as_str()));
            with_bundles(
                input,
                &[
                    (
                        "infraAgentBundle",
                        rendered.infra_agent.as_str(),
                        prior.as_ref().map(|p| p.infra_agent.as_str()),
                    ),
                    (
                        "containerMonitorBundle",
                        rendered.container_monitor.as_str(),
                        prior.as_ref().map(|p| p.container_monitor.as_str()),
                    ),
                    (
                        "serverMonitorBundle",
                        rendered.server_monitor.as_str(),
                        prior.as_ref().map(|p| p.server_monitor.as_str()),
                    ),
                ],
            )
            .classify()
        });
        self.converge_collector(
            ns,
            &host_name,
            &host_workload,
            host_check,
            &annotation,
            &mut outcome,
        )
        .await?;

        let mut collectors = BTreeMap::new();
        if let Some(d) = self.store().get::<Deployment>(ns, &key.name).await? {
            collectors.insert(key.name.clone(), d.readiness());
        }
        if let Some(ds) = self.store().get::<DaemonSet>(ns, &host_name).await? {
            collectors.insert(host_name.clone(), ds.readiness());
        }
        self.persist_collector_status(ns, &cr, collectors).await?;
        Ok(outcome)
    }

    /// Create, patch or restart one collector workload according to its classification
    async fn converge_collector(
        &self,
        ns: &str,
        name: &str,
        workload: &dyn ManagedWorkload,
        check: Option<Classification>,
        annotation: &str,
        outcome: &mut PassOutcome,
    ) -> Result<()> {
        let Some(classification) = check else {
            workload.create().await?;
            outcome.phase = Phase::Provisioning;
            return Ok(());
        };

        self.logger
            .log_verdict(FAMILY_COLLECTOR, ns, name, &classification);
        self.metrics
            .inc_verdict(FAMILY_COLLECTOR, classification.verdict.as_str());
        outcome.verdict = outcome.verdict.max(Some(classification.verdict));

        let pods = self
            .converge(FAMILY_COLLECTOR, ns, workload, classification.verdict, annotation)
            .await?;
        outcome.restarted.extend(pods);
        Ok(())
    }

    async fn persist_collector_status(
        &self,
        ns: &str,
        cr: &ClusterCollector,
        collectors: BTreeMap<String, WorkloadReadiness>,
    ) -> Result<()> {
        let current = cr.status.as_ref().map(|s| &s.collectors);
        if current == Some(&collectors) {
            return Ok(());
        }
        let status = ClusterCollectorStatus {
            last_update_time: Some(now_rfc3339()),
            collectors,
        };
        self.persist_status(ns, cr, |obj: &mut ClusterCollector| {
            obj.status = Some(status.clone());
        })
        .await
    }
}
