//! Workload lifecycle controller
//!
//! Sequences the dependent resource manager, drift classifier, workload
//! operations and status reporter for each agent family. A pass moves one
//! desired-state object through `Absent -> Provisioning -> Steady`:
//!
//! - desired state gone: generated bundles are removed, nothing requeued
//! - workload missing: dependents and workload are created
//! - workload present: bundles rewritten, drift classified, then restart,
//!   in-place update or status refresh
//!
//! Drift is measured against the applied state recorded on each workload.
//! That record moves forward only after the workload change (and any forced
//! restart) succeeded, so a failed pass is classified the same way on replay.

mod agent;
mod collector;
mod infraviz;


pub use agent::AGENT_COMPONENT;
pub use collector::{CLUSTER_COLLECTOR_COMPONENT, HOST_COLLECTOR_COMPONENT};
pub use infraviz::INFRAVIZ_COMPONENT;

use crate::drift::{AppliedState, Verdict};
use crate::error::{Error, Result};
use crate::health::{components, HealthRegistry};
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::settings::OperatorSettings;
use crate::status::StatusSource;
use crate::store::{ClusterObject, ObjectStore};
use crate::workload::{ManagedWorkload, WorkloadPatch};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info_span, warn, Instrument};

pub const FAMILY_AGENT: &str = "agent";
pub const FAMILY_COLLECTOR: &str = "collector";
pub const FAMILY_INFRAVIZ: &str = "infraviz";

/// Namespace and name of one desired-state object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(object: &K) -> Result<Self> {
        let namespace = object
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        Ok(Self::new(namespace, object.name_any()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Desired state no longer exists
    Absent,
    /// At least one workload object was created this pass
    Provisioning,
    /// Every workload object existed and was reclassified
    Steady,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub phase: Phase,
    /// Strongest verdict across the workloads classified this pass
    pub verdict: Option<Verdict>,
    /// `None` means wait for the next watch event
    pub requeue_after: Option<Duration>,
    /// Pods deleted to force a restart
    pub restarted: Vec<String>,
}

impl PassOutcome {
    fn absent() -> Self {
        Self {
            phase: Phase::Absent,
            verdict: None,
            requeue_after: None,
            restarted: Vec::new(),
        }
    }
}

/// Reconciliation engine shared by the three controllers
pub struct Reconciler<C> {
    store: Arc<C>,
    settings: Arc<OperatorSettings>,
    status: Arc<dyn StatusSource>,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: OperatorMetrics,
}

impl<C: ObjectStore> Reconciler<C> {
    pub fn new(
        store: Arc<C>,
        settings: Arc<OperatorSettings>,
        status: Arc<dyn StatusSource>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            settings,
            status,
            health,
            logger,
            metrics: OperatorMetrics::new(),
        }
    }

    pub fn settings(&self) -> &OperatorSettings {
        &self.settings
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Run one pass inside a span, recording latency, outcome and controller health
    async fn run_pass<F>(
        &self,
        family: &'static str,
        key: &ResourceKey,
        pass: F,
    ) -> Result<PassOutcome>
    where
        F: Future<Output = Result<PassOutcome>>,
    {
        let span = info_span!(
            "reconcile",
            family,
            namespace = %key.namespace,
            name = %key.name
        );
        let started = Instant::now();
        let result = async {
            self.logger
                .log_reconcile_started(family, &key.namespace, &key.name);
            pass.await
        }
        .instrument(span)
        .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.metric_label(),
        };
        self.metrics
            .observe_reconcile(family, outcome, started.elapsed().as_secs_f64());
        self.health
            .record_pass(controller_component(family), result.as_ref().err())
            .await;
        result
    }

    fn note_placeholder(&self, namespace: &str, created: bool) {
        if created {
            self.metrics.inc_credential_placeholders();
            self.logger
                .log_credential_placeholder(namespace, &self.settings.credential_secret_name);
        }
    }

    /// Force a restart; a workload with no pods yet is left to start on its own
    async fn restart(
        &self,
        family: &str,
        namespace: &str,
        workload: &dyn ManagedWorkload,
    ) -> Result<Vec<String>> {
        match workload.restart_one().await {
            Ok(pods) => {
                self.metrics.inc_restarts(family);
                self.logger
                    .log_workload_restarted(family, namespace, workload.name(), &pods);
                Ok(pods)
            }
            Err(Error::NoPodsToRestart(name)) => {
                warn!(namespace, workload = %name, "No running pods to restart");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Bring an existing workload to its rendered form; returns the pods restarted
    async fn converge(
        &self,
        family: &str,
        namespace: &str,
        workload: &dyn ManagedWorkload,
        verdict: Verdict,
        annotation: &str,
    ) -> Result<Vec<String>> {
        match verdict {
            Verdict::Restart => {
                workload.update(&workload.rendered_patch(None)).await?;
                let pods = self.restart(family, namespace, workload).await?;
                workload.update(&WorkloadPatch::record(annotation)).await?;
                Ok(pods)
            }
            Verdict::InPlaceUpdate => {
                workload
                    .update(&workload.rendered_patch(Some(annotation.to_string())))
                    .await?;
                Ok(Vec::new())
            }
            Verdict::NoChange => Ok(Vec::new()),
        }
    }

    /// Write a desired-state object's status, re-fetching once on conflict
    async fn persist_status<K, F>(&self, namespace: &str, object: &K, set: F) -> Result<()>
    where
        K: ClusterObject,
        F: Fn(&mut K) + Send + Sync,
    {
        let mut updated = object.clone();
        set(&mut updated);
        match self.store.replace_status(namespace, &updated).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => {
                let name = object.name_any();
                let Some(mut fresh) = self.store.get::<K>(namespace, &name).await? else {
                    return Ok(());
                };
                set(&mut fresh);
                self.store.replace_status(namespace, &fresh).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn status_unavailable(&self, family: &str, key: &ResourceKey, err: &Error) {
        self.metrics.inc_status_fetch_failures();
        self.logger
            .log_status_unavailable(family, &key.namespace, &key.name, &err.to_string());
    }
}

fn controller_component(family: &str) -> &'static str {
    match family {
        FAMILY_COLLECTOR => components::COLLECTOR_CONTROLLER,
        FAMILY_INFRAVIZ => components::INFRAVIZ_CONTROLLER,
        _ => components::AGENT_CONTROLLER,
    }
}

/// Owner reference linking generated objects to their desired state
fn owner_of<K: Resource<DynamicType = ()>>(object: &K) -> Result<OwnerReference> {
    object
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("metadata.uid"))
}

/// Decode a last-applied annotation; an unreadable one is treated as absent
fn applied_state<S>(raw: Option<&str>, workload: &str) -> Option<AppliedState<S>>
where
    S: Serialize + DeserializeOwned,
{
    let raw = raw?;
    match AppliedState::from_annotation(raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(workload, error = %e, "Ignoring unreadable last-applied annotation");
            None
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
