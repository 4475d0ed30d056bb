//! Managed workload objects
//!
//! One interface over the two workload shapes the operator runs: a scaled
//! process group ([`Deployment`](k8s_openapi::api::apps::v1::Deployment)) and a
//! one-per-node process group ([`DaemonSet`](k8s_openapi::api::apps::v1::DaemonSet)).
//! The shapes differ in where the pod template lives, how readiness is read
//! and whether a replica count applies. A forced restart deletes one pod.

mod daemonset;
mod deployment;

pub use daemonset::daemon_set;
pub use deployment::deployment;

use crate::crd::WorkloadReadiness;
use crate::error::{Error, Result};
use crate::resources::LAST_APPLIED_ANNOTATION;
use crate::store::{kind_of, ClusterObject, ObjectStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// What the engine reads back from a live workload object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveWorkload {
    /// Image of the primary container
    pub image: Option<String>,
    pub resources: Option<ResourceRequirements>,
    /// Raw last-applied-desired-state annotation
    pub last_applied: Option<String>,
    pub readiness: WorkloadReadiness,
}

/// Changes applied to a live workload object
#[derive(Debug, Clone, Default)]
pub struct WorkloadPatch {
    /// Replacement pod spec; set when the whole template is re-rendered
    pub pod_spec: Option<PodSpec>,
    pub replicas: Option<i32>,
    /// New last-applied annotation; `None` leaves the recorded state alone
    pub last_applied: Option<String>,
}

impl WorkloadPatch {
    /// Patch that only records the state a workload now runs
    pub fn record(last_applied: impl Into<String>) -> Self {
        Self {
            last_applied: Some(last_applied.into()),
            ..Default::default()
        }
    }
}

/// Shape-specific access to a workload kind
pub trait WorkloadShape: ClusterObject {
    fn pod_template(&self) -> Option<&PodTemplateSpec>;

    fn pod_template_mut(&mut self) -> &mut PodTemplateSpec;

    fn readiness(&self) -> WorkloadReadiness;

    fn replicas(&self) -> Option<i32>;

    fn set_replicas(&mut self, replicas: i32);
}

/// Lifecycle operations on one workload object
#[async_trait]
pub trait ManagedWorkload: Send + Sync {
    fn name(&self) -> &str;

    /// Live state, `None` when the object does not exist
    async fn get(&self) -> Result<Option<LiveWorkload>>;

    async fn create(&self) -> Result<()>;

    /// Create the object when absent; true when it was created
    async fn init(&self) -> Result<bool>;

    /// Patch carrying the rendered pod template and replica count
    fn rendered_patch(&self, last_applied: Option<String>) -> WorkloadPatch;

    /// Apply a patch, re-fetching and retrying once on a conflicting write
    async fn update(&self, patch: &WorkloadPatch) -> Result<()>;

    /// Delete one running pod so the platform recreates it; returns the name deleted
    async fn restart_one(&self) -> Result<Vec<String>>;
}

/// Object metadata shared by every workload the operator creates
pub fn workload_meta(
    name: &str,
    namespace: &str,
    owner: &OwnerReference,
    labels: &BTreeMap<String, String>,
    last_applied: &str,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        annotations: Some(BTreeMap::from([(
            LAST_APPLIED_ANNOTATION.to_string(),
            last_applied.to_string(),
        )])),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// A workload object of shape `K` rendered from desired state
pub struct Workload<'a, K, C> {
    store: &'a C,
    namespace: &'a str,
    name: String,
    selector: BTreeMap<String, String>,
    blueprint: K,
}

impl<'a, K, C> Workload<'a, K, C>
where
    K: WorkloadShape,
    C: ObjectStore,
{
    pub fn new(
        store: &'a C,
        namespace: &'a str,
        selector: BTreeMap<String, String>,
        blueprint: K,
    ) -> Result<Self> {
        let name = blueprint
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("metadata.name"))?;
        Ok(Self {
            store,
            namespace,
            name,
            selector,
            blueprint,
        })
    }

    /// Pod spec of the rendered object
    pub fn blueprint_pod_spec(&self) -> Option<PodSpec> {
        self.blueprint.pod_template().and_then(|t| t.spec.clone())
    }
}

fn apply_patch<K: WorkloadShape>(object: &mut K, patch: &WorkloadPatch) {
    if let Some(last_applied) = &patch.last_applied {
        object
            .meta_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(LAST_APPLIED_ANNOTATION.to_string(), last_applied.clone());
    }
    if let Some(replicas) = patch.replicas {
        object.set_replicas(replicas);
    }

    if let Some(pod_spec) = &patch.pod_spec {
        object.pod_template_mut().spec = Some(pod_spec.clone());
    }
}

impl LiveWorkload {
    /// Read back the fields drift detection looks at
    pub fn of<K: WorkloadShape>(object: &K) -> Self {
        let container = object
            .pod_template()
            .and_then(|t| t.spec.as_ref())
            .and_then(|spec| spec.containers.first());
        LiveWorkload {
            image: container.and_then(|c| c.image.clone()),
            resources: container.and_then(|c| c.resources.clone()),
            last_applied: object
                .meta()
                .annotations
                .as_ref()
                .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
                .cloned(),
            readiness: object.readiness(),
        }
    }
}

#[async_trait]
impl<'a, K, C> ManagedWorkload for Workload<'a, K, C>
where
    K: WorkloadShape,
    C: ObjectStore,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> Result<Option<LiveWorkload>> {
        let found = self.store.get::<K>(self.namespace, &self.name).await?;
        Ok(found.as_ref().map(LiveWorkload::of))
    }

    async fn create(&self) -> Result<()> {
        self.store.create(self.namespace, &self.blueprint).await?;
        info!(
            kind = %kind_of::<K>(),
            namespace = %self.namespace,
            name = %self.name,
            "Workload created"
        );
        Ok(())
    }

    async fn init(&self) -> Result<bool> {
        if self.store.get::<K>(self.namespace, &self.name).await?.is_some() {
            return Ok(false);
        }
        self.create().await?;
        Ok(true)
    }

    fn rendered_patch(&self, last_applied: Option<String>) -> WorkloadPatch {
        WorkloadPatch {
            pod_spec: self.blueprint_pod_spec(),
            replicas: self.blueprint.replicas(),
            last_applied,
            ..Default::default()
        }
    }

    async fn update(&self, patch: &WorkloadPatch) -> Result<()> {
        let mut retried = false;
        loop {
            let mut current = self
                .store
                .get::<K>(self.namespace, &self.name)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: kind_of::<K>(),
                    namespace: self.namespace.to_string(),
                    name: self.name.clone(),
                })?;
            apply_patch(&mut current, patch);

            match self.store.replace(self.namespace, &current).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() && !retried => {
                    warn!(
                        kind = %kind_of::<K>(),
                        namespace = %self.namespace,
                        name = %self.name,
                        "Conflicting workload update, re-fetching"
                    );
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn restart_one(&self) -> Result<Vec<String>> {
        let pods: Vec<Pod> = self.store.list(self.namespace, &self.selector).await?;
        let Some(pod_name) = pods.into_iter().find_map(|pod| pod.metadata.name) else {
            return Err(Error::NoPodsToRestart(self.name.clone()));
        };

        let mut deleted = Vec::new();
        if self.store.delete::<Pod>(self.namespace, &pod_name).await? {
            deleted.push(pod_name);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::selector_labels;
    use crate::store::{MemoryStore, WriteVerb};
    use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
    use k8s_openapi::api::core::v1::Container;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "monitoring.agents.dev/v1alpha1".to_string(),
            kind: "ClusterAgent".to_string(),
            name: "agent".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        }
    }

    fn pod_spec(image: &str) -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "agent".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn pod(name: &str, labels: &BTreeMap<String, String>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn agent_deployment(image: &str) -> Deployment {
        let labels = selector_labels("cluster-agent", "agent");
        deployment(
            workload_meta("agent", "ns", &owner(), &labels, "{}"),
            &labels,
            1,
            pod_spec(image),
        )
    }

    #[tokio::test]
    async fn test_init_creates_once() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        let workload = Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();

        assert!(workload.init().await.unwrap());
        assert!(!workload.init().await.unwrap());

        let live = workload.get().await.unwrap().unwrap();
        assert_eq!(live.image.as_deref(), Some("agent:1.0"));
        assert_eq!(live.last_applied.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_update_patches_template_and_annotation() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        let workload = Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();
        workload.create().await.unwrap();

        workload
            .update(&WorkloadPatch {
                pod_spec: Some(pod_spec("agent:1.1")),
                last_applied: Some("next".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let live = workload.get().await.unwrap().unwrap();
        assert_eq!(live.image.as_deref(), Some("agent:1.1"));
        assert_eq!(live.last_applied.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_update_retries_once_on_conflict() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        let workload = Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();
        workload.create().await.unwrap();

        store.inject_conflict::<Deployment>();
        workload
            .update(&WorkloadPatch {
                pod_spec: Some(pod_spec("agent:1.1")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.writes(WriteVerb::Replace, "Deployment").len(), 1);
    }

    #[tokio::test]
    async fn test_update_of_missing_workload_is_not_found() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        let workload = Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();
        let err = workload.update(&WorkloadPatch::default()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_without_annotation_keeps_recorded_state() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        let workload = Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();
        workload.create().await.unwrap();

        workload
            .update(&WorkloadPatch {
                pod_spec: Some(pod_spec("agent:1.1")),
                replicas: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();

        let live = workload.get().await.unwrap().unwrap();
        assert_eq!(live.image.as_deref(), Some("agent:1.1"));
        assert_eq!(live.last_applied.as_deref(), Some("{}"));
        assert_eq!(live.readiness.desired, 3);

        workload.update(&WorkloadPatch::record("after")).await.unwrap();
        let live = workload.get().await.unwrap().unwrap();
        assert_eq!(live.image.as_deref(), Some("agent:1.1"));
        assert_eq!(live.last_applied.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_rendered_patch_restores_template() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        let mut drifted = agent_deployment("agent:0.9");
        drifted.spec.as_mut().unwrap().replicas = Some(5);
        store.insert("ns", &drifted).unwrap();

        let workload = Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();
        workload
            .update(&workload.rendered_patch(Some("applied".to_string())))
            .await
            .unwrap();

        let live = workload.get().await.unwrap().unwrap();
        assert_eq!(live.image.as_deref(), Some("agent:1.0"));
        assert_eq!(live.readiness.desired, 1);
        assert_eq!(live.last_applied.as_deref(), Some("applied"));
    }

    #[tokio::test]
    async fn test_deployment_restart_deletes_one_of_many_pods() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        for name in ["agent-a", "agent-b", "agent-c"] {
            store.insert("ns", &pod(name, &labels)).unwrap();
        }
        let workload =
            Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();

        let deleted = workload.restart_one().await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(store.writes(WriteVerb::Delete, "Pod"), deleted);
    }

    #[tokio::test]
    async fn test_deployment_restart_deletes_its_pods_only() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        store.insert("ns", &pod("agent-abc", &labels)).unwrap();
        store
            .insert("ns", &pod("other", &selector_labels("cluster-agent", "other")))
            .unwrap();
        let workload =
            Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();

        let deleted = workload.restart_one().await.unwrap();
        assert_eq!(deleted, vec!["agent-abc".to_string()]);
        assert!(store.contains::<Pod>("ns", "other"));
    }

    #[tokio::test]
    async fn test_daemon_set_restart_deletes_one_pod() {
        let store = MemoryStore::new();
        let labels = selector_labels("infraviz", "viz");
        for name in ["viz-a", "viz-b", "viz-c"] {
            store.insert("ns", &pod(name, &labels)).unwrap();
        }
        let blueprint: DaemonSet = daemon_set(
            workload_meta("viz", "ns", &owner(), &labels, "{}"),
            &labels,
            pod_spec("machine-agent:1"),
        );
        let workload = Workload::new(&store, "ns", labels, blueprint).unwrap();

        let deleted = workload.restart_one().await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(store.writes(WriteVerb::Delete, "Pod").len(), 1);
    }

    #[tokio::test]
    async fn test_restart_without_pods_errors() {
        let store = MemoryStore::new();
        let labels = selector_labels("cluster-agent", "agent");
        let workload = Workload::new(&store, "ns", labels, agent_deployment("agent:1.0")).unwrap();
        let err = workload.restart_one().await.unwrap_err();
        assert!(matches!(err, Error::NoPodsToRestart(_)));
    }
}
