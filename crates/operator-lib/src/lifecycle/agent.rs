use super::{
    applied_state, now_rfc3339, owner_of, PassOutcome, Phase, Reconciler, ResourceKey,
    FAMILY_AGENT,
};
use crate::crd::{ClusterAgent, ClusterAgentSpec, ClusterAgentStatus};
use crate::drift::{classify_agent, AppliedState, Verdict};
use crate::endpoint;
use crate::error::Result;
use crate::filter;
use crate::resources::{
    selector_labels, Credential, ResourceManager, API_USER_KEY, CONTROLLER_KEY_KEY,
    EVENT_KEY_KEY,
};
use crate::settings::OperatorSettings;
use crate::snapshot::{self, ConfigSnapshot};
use crate::store::ObjectStore;
use crate::workload::{deployment, workload_meta, LiveWorkload, ManagedWorkload, Workload};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector,
    PodSpec, SecretKeySelector, Volume, VolumeMount,
};
use tracing::info;

pub const AGENT_COMPONENT: &str = "cluster-agent";

const CONFIG_VOLUME: &str = "agent-config";
const CONFIG_MOUNT_PATH: &str = "/opt/agent/config/";
const SSL_VOLUME: &str = "agent-ssl-cert";
const SSL_MOUNT_DIR: &str = "/opt/agent/ssl";

/// Desired spec with operator defaults filled in
fn effective_spec(spec: &ClusterAgentSpec, settings: &OperatorSettings) -> ClusterAgentSpec {
    let mut desired = spec.clone();
    if desired.image.is_empty() {
        desired.image = settings.default_agent_image.clone();
    }
    if desired.service_account_name.is_empty() {
        desired.service_account_name = settings.service_account_name.clone();
    }
    if desired.custom_ssl_config_map.is_empty() {
        desired.custom_ssl_config_map = settings.default_custom_ssl_config_map.clone();
    }
    desired
}

/// Reject desired state that would only fail later, before anything is written
fn validate(desired: &ClusterAgentSpec) -> Result<()> {
    endpoint::parse(&desired.controller_url)?;
    for patterns in [
        &desired.ns_to_monitor,
        &desired.ns_to_monitor_exclude,
        &desired.nodes_to_monitor,
        &desired.nodes_to_monitor_exclude,
        &desired.ns_to_instrument,
        &desired.ns_to_instrument_exclude,
    ] {
        filter::validate(patterns)?;
    }
    Ok(())
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Credential references followed by user overrides, replaced by name
pub(crate) fn agent_env(
    desired: &ClusterAgentSpec,
    credential: &Credential,
    secret_name: &str,
) -> Vec<EnvVar> {
    let mut env = vec![
        secret_env("AGENT_REST_API_CREDENTIALS", secret_name, API_USER_KEY),
        EnvVar {
            name: "AGENT_NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if credential.has_key(CONTROLLER_KEY_KEY) {
        env.push(secret_env(
            "AGENT_ACCOUNT_ACCESS_KEY",
            secret_name,
            CONTROLLER_KEY_KEY,
        ));
    }
    if credential.has_key(EVENT_KEY_KEY) {
        env.push(secret_env("AGENT_EVENT_ACCESS_KEY", secret_name, EVENT_KEY_KEY));
    }

    for var in &desired.env {
        match env.iter_mut().find(|e| e.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => env.push(var.clone()),
        }
    }
    env
}

fn agent_pod_spec(
    desired: &ClusterAgentSpec,
    snapshot: &ConfigSnapshot,
    credential: &Credential,
    settings: &OperatorSettings,
) -> PodSpec {
    let mut mounts = vec![VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(settings.agent_bundle_name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if !desired.agent_ssl_cert.is_empty() {
        mounts.push(VolumeMount {
            name: SSL_VOLUME.to_string(),
            mount_path: format!("{}/{}", SSL_MOUNT_DIR, desired.agent_ssl_cert),
            sub_path: Some(desired.agent_ssl_cert.clone()),
            ..Default::default()
        });
        volumes.push(Volume {
            name: SSL_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(desired.custom_ssl_config_map.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    PodSpec {
        containers: vec![Container {
            name: AGENT_COMPONENT.to_string(),
            image: Some(desired.image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            args: (!desired.args.is_empty()).then(|| desired.args.clone()),
            env: Some(agent_env(desired, credential, &settings.credential_secret_name)),
            ports: Some(vec![ContainerPort {
                container_port: snapshot.agent_server_port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            resources: desired.resources.clone(),
            volume_mounts: Some(mounts),
            ..Default::default()
        }],
        service_account_name: Some(desired.service_account_name.clone()),
        node_selector: (!desired.node_selector.is_empty()).then(|| desired.node_selector.clone()),
        tolerations: (!desired.tolerations.is_empty()).then(|| desired.tolerations.clone()),
        volumes: Some(volumes),
        ..Default::default()
    }
}

impl<C: ObjectStore> Reconciler<C> {
    /// Reconcile one primary agent desired-state object
    pub async fn reconcile_agent(&self, key: &ResourceKey) -> Result<PassOutcome> {
        self.run_pass(FAMILY_AGENT, key, self.agent_pass(key)).await
    }

    async fn agent_pass(&self, key: &ResourceKey) -> Result<PassOutcome> {
        let settings = self.settings();
        let ns = key.namespace.as_str();
        let rm = ResourceManager::new(self.store(), settings, ns);

        let Some(cr) = self.store().get::<ClusterAgent>(ns, &key.name).await? else {
            let removed = rm.remove_bundles(&[settings.agent_bundle_name.as_str()]).await;
            self.logger.log_cleanup(FAMILY_AGENT, ns, &key.name, &removed);
            return Ok(PassOutcome::absent());
        };

        let desired = effective_spec(&cr.spec, settings);
        validate(&desired)?;
        rm.ensure_tls_trust_config(&desired).await?;

        let owner = owner_of(&cr)?;
        let credential = rm.ensure_credential().await?;
        self.note_placeholder(ns, credential.created);

        let existing = self.store().get::<Deployment>(ns, &key.name).await?;
        let is_new = existing.is_none();
        let (prior, snapshot) = rm
            .ensure_config_bundle(&owner, |prior| {
                let prior = if is_new { None } else { prior };
                snapshot::resolve(&desired, prior, &credential.revision, settings.agent_server_port)
            })
            .await?;

        let labels = selector_labels(AGENT_COMPONENT, &key.name);
        rm.ensure_endpoint(&owner, &key.name, &labels, snapshot.agent_server_port)
            .await?;

        let annotation = AppliedState::new(desired.clone(), credential.revision.clone())
            .to_annotation()?;
        let blueprint = deployment(
            workload_meta(&key.name, ns, &owner, &labels, &annotation),
            &labels,
            desired.replicas.unwrap_or(1),
            agent_pod_spec(&desired, &snapshot, &credential, settings),
        );
        let workload = Workload::new(self.store(), ns, labels, blueprint)?;

        let Some(live) = existing.as_ref().map(LiveWorkload::of) else {
            workload.create().await?;
            self.refresh_agent_status(key, &cr, &snapshot).await?;
            return Ok(PassOutcome {
                phase: Phase::Provisioning,
                verdict: None,
                requeue_after: None,
                restarted: Vec::new(),
            });
        };

        let applied = applied_state::<ClusterAgentSpec>(live.last_applied.as_deref(), &key.name);
        let classification = classify_agent(
            &desired,
            prior.as_ref(),
            applied.as_ref(),
            &live,
            &credential.revision,
        );
        self.logger
            .log_verdict(FAMILY_AGENT, ns, &key.name, &classification);
        self.metrics
            .inc_verdict(FAMILY_AGENT, classification.verdict.as_str());

        let mut outcome = PassOutcome {
            phase: Phase::Steady,
            verdict: Some(classification.verdict),
            requeue_after: Some(settings.requeue_delay),
            restarted: Vec::new(),
        };
        if classification.verdict == Verdict::NoChange {
            self.refresh_agent_status(key, &cr, &snapshot).await?;
            outcome.requeue_after = None;
        } else {
            outcome.restarted = self
                .converge(FAMILY_AGENT, ns, &workload, classification.verdict, &annotation)
                .await?;
        }
        Ok(outcome)
    }

    /// Query the agent and persist its status when it changed
    async fn refresh_agent_status(
        &self,
        key: &ResourceKey,
        cr: &ClusterAgent,
        snapshot: &ConfigSnapshot,
    ) -> Result<()> {
        let address = self.settings().service_address(&key.name, &key.namespace);
        let observed = match self
            .status
            .fetch_status(&address, snapshot.agent_server_port)
            .await
        {
            Ok(observed) => {
                self.health
                    .set_healthy(crate::health::components::STATUS_REPORTER)
                    .await;
                observed
            }
            Err(e) => {
                self.health
                    .set_degraded(crate::health::components::STATUS_REPORTER, e.to_string())
                    .await;
                self.status_unavailable(FAMILY_AGENT, key, &e);
                return Ok(());
            }
        };

        let current = cr.status.as_ref().and_then(|s| s.state.as_ref());
        if current == Some(&observed) {
            return Ok(());
        }

        info!(namespace = %key.namespace, name = %key.name, "Agent status changed, persisting");
        let status = ClusterAgentStatus {
            last_update_time: Some(now_rfc3339()),
            state: Some(observed),
        };
        self.persist_status(&key.namespace, cr, |obj: &mut ClusterAgent| {
            obj.status = Some(status.clone());
        })
        .await
    }
}
