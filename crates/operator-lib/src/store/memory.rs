use super::{kind_of, object_name, ClusterObject, ObjectStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVerb {
    Create,
    Replace,
    ReplaceStatus,
    Delete,
}

/// One write received by a [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub verb: WriteVerb,
    pub kind: String,
    pub name: String,
}

type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    journal: Vec<WriteRecord>,
    next_version: u64,
    pending_conflicts: BTreeSet<String>,
    pending_failures: BTreeSet<String>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// In-process [`ObjectStore`]
///
/// Assigns resource versions and uids the way the API server does, enforces
/// optimistic concurrency on replace and journals every write so callers can
/// assert on exactly what was changed.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key<K: ClusterObject>(namespace: &str, name: &str) -> ObjectKey {
    (kind_of::<K>(), namespace.to_string(), name.to_string())
}

fn resource_version(value: &Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn set_meta(value: &mut Value, field: &str, content: &str) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(field.to_string(), Value::String(content.to_string()));
    }
}

fn labels_match(value: &Value, wanted: &BTreeMap<String, String>) -> bool {
    let labels = value.pointer("/metadata/labels");
    wanted.iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            .map_or(false, |found| found == v)
    })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Place an object in the store without journaling it, overwriting any
    /// existing copy. Used to stage cluster state that the engine did not write.
    pub fn insert<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<()> {
        let name = object_name(object)?.to_string();
        let mut value = serde_json::to_value(object)?;
        let mut state = self.lock();
        let version = state.bump();
        set_meta(&mut value, "namespace", namespace);
        set_meta(&mut value, "resourceVersion", &version);
        if value.pointer("/metadata/uid").is_none() {
            set_meta(&mut value, "uid", &format!("uid-{}", version));
        }
        state.objects.insert(key::<K>(namespace, &name), value);
        Ok(())
    }

    /// Make the next `replace` of this kind fail with a conflict
    pub fn inject_conflict<K: ClusterObject>(&self) {
        self.lock().pending_conflicts.insert(kind_of::<K>());
    }

    /// Make the next `replace` of this kind fail with a server error
    pub fn inject_failure<K: ClusterObject>(&self) {
        self.lock().pending_failures.insert(kind_of::<K>());
    }

    pub fn journal(&self) -> Vec<WriteRecord> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Journaled writes of one verb against one kind
    pub fn writes(&self, verb: WriteVerb, kind: &str) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter(|w| w.verb == verb && w.kind == kind)
            .map(|w| w.name.clone())
            .collect()
    }

    pub fn contains<K: ClusterObject>(&self, namespace: &str, name: &str) -> bool {
        self.lock().objects.contains_key(&key::<K>(namespace, name))
    }
}

fn conflict<K: ClusterObject>(namespace: &str, name: &str) -> Error {
    Error::Conflict {
        kind: kind_of::<K>(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn server_error() -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn not_found<K: ClusterObject>(namespace: &str, name: &str) -> Error {
    Error::NotFound {
        kind: kind_of::<K>(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

impl State {
    fn record<K: ClusterObject>(&mut self, verb: WriteVerb, name: &str) {
        self.journal.push(WriteRecord {
            verb,
            kind: kind_of::<K>(),
            name: name.to_string(),
        });
    }

    /// Stored copy for an optimistic write, checking the caller's version
    fn current_for_write<K: ClusterObject>(
        &mut self,
        namespace: &str,
        name: &str,
        incoming: &Value,
    ) -> Result<Value> {
        let stored = self
            .objects
            .get(&key::<K>(namespace, name))
            .cloned()
            .ok_or_else(|| not_found::<K>(namespace, name))?;
        if let Some(version) = resource_version(incoming) {
            if Some(version) != resource_version(&stored) {
                return Err(conflict::<K>(namespace, name));
            }
        }
        Ok(stored)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let value = self.lock().objects.get(&key::<K>(namespace, name)).cloned();
        match value {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn create<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?.to_string();
        let mut value = serde_json::to_value(object)?;
        let mut state = self.lock();
        let k = key::<K>(namespace, &name);
        if state.objects.contains_key(&k) {
            return Err(Error::AlreadyExists {
                kind: kind_of::<K>(),
                namespace: namespace.to_string(),
                name,
            });
        }
        let version = state.bump();
        set_meta(&mut value, "namespace", namespace);
        set_meta(&mut value, "resourceVersion", &version);
        set_meta(&mut value, "uid", &format!("uid-{}", version));
        state.objects.insert(k, value.clone());
        state.record::<K>(WriteVerb::Create, &name);
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?.to_string();
        let mut value = serde_json::to_value(object)?;
        let mut state = self.lock();
        if state.pending_conflicts.remove(&kind_of::<K>()) {
            return Err(conflict::<K>(namespace, &name));
        }
        if state.pending_failures.remove(&kind_of::<K>()) {
            return Err(server_error());
        }
        let stored = state.current_for_write::<K>(namespace, &name, &value)?;

        let version = state.bump();
        set_meta(&mut value, "namespace", namespace);
        set_meta(&mut value, "resourceVersion", &version);
        if let Some(uid) = stored.pointer("/metadata/uid").and_then(Value::as_str) {
            set_meta(&mut value, "uid", uid);
        }
        if let Some(obj) = value.as_object_mut() {
            match stored.get("status") {
                Some(status) => {
                    obj.insert("status".to_string(), status.clone());
                }
                None => {
                    obj.remove("status");
                }
            }
        }
        state.objects.insert(key::<K>(namespace, &name), value.clone());
        state.record::<K>(WriteVerb::Replace, &name);
        Ok(serde_json::from_value(value)?)
    }

    async fn replace_status<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?.to_string();
        let incoming = serde_json::to_value(object)?;
        let mut state = self.lock();
        let mut stored = state.current_for_write::<K>(namespace, &name, &incoming)?;

        let version = state.bump();
        set_meta(&mut stored, "resourceVersion", &version);
        if let Some(obj) = stored.as_object_mut() {
            match incoming.get("status") {
                Some(status) => {
                    obj.insert("status".to_string(), status.clone());
                }
                None => {
                    obj.remove("status");
                }
            }
        }
        state.objects.insert(key::<K>(namespace, &name), stored.clone());
        state.record::<K>(WriteVerb::ReplaceStatus, &name);
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        let mut state = self.lock();
        let removed = state.objects.remove(&key::<K>(namespace, name)).is_some();
        if removed {
            state.record::<K>(WriteVerb::Delete, name);
        }
        Ok(removed)
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let kind = kind_of::<K>();
        let values: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), v)| *k == kind && ns == namespace && labels_match(v, labels))
            .map(|(_, v)| v.clone())
            .collect();
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([("tier".to_string(), "agent".to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let created = store.create("ns", &config_map("cfg", "a")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());

        let err = store.create("ns", &config_map("cfg", "b")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(store.writes(WriteVerb::Create, "ConfigMap"), vec!["cfg"]);
    }

    #[tokio::test]
    async fn test_replace_detects_stale_version() {
        let store = MemoryStore::new();
        let first = store.create("ns", &config_map("cfg", "a")).await.unwrap();

        let mut update = first.clone();
        update.data = Some(BTreeMap::from([("key".to_string(), "b".to_string())]));
        store.replace("ns", &update).await.unwrap();

        let err = store.replace("ns", &update).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_replace_keeps_status_and_status_write_keeps_spec() {
        let store = MemoryStore::new();
        let mut deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("agent".to_string()),
                ..Default::default()
            },
            status: Some(DeploymentStatus {
                ready_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        store.insert("ns", &deployment).unwrap();

        deployment.status = None;
        deployment.metadata.resource_version = None;
        let replaced = store.replace("ns", &deployment).await.unwrap();
        assert_eq!(replaced.status.unwrap().ready_replicas, Some(1));
    }

    #[tokio::test]
    async fn test_list_filters_by_labels_and_namespace() {
        let store = MemoryStore::new();
        store.insert("ns", &config_map("one", "a")).unwrap();
        store.insert("other", &config_map("two", "a")).unwrap();
        let mut unlabeled = config_map("three", "a");
        unlabeled.metadata.labels = None;
        store.insert("ns", &unlabeled).unwrap();

        let wanted = BTreeMap::from([("tier".to_string(), "agent".to_string())]);
        let found: Vec<ConfigMap> = store.list("ns", &wanted).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let store = MemoryStore::new();
        store.insert("ns", &config_map("cfg", "a")).unwrap();
        assert!(store.delete::<ConfigMap>("ns", "cfg").await.unwrap());
        assert!(!store.delete::<ConfigMap>("ns", "cfg").await.unwrap());
        assert_eq!(store.journal().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_conflict_fires_once() {
        let store = MemoryStore::new();
        let created = store.create("ns", &config_map("cfg", "a")).await.unwrap();
        store.inject_conflict::<ConfigMap>();
        assert!(store.replace("ns", &created).await.unwrap_err().is_conflict());
        assert!(store.replace("ns", &created).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once_without_writing() {
        let store = MemoryStore::new();
        let created = store.create("ns", &config_map("cfg", "a")).await.unwrap();
        store.inject_failure::<ConfigMap>();

        let err = store.replace("ns", &created).await.unwrap_err();
        assert_eq!(err.metric_label(), "api");
        assert!(store.writes(WriteVerb::Replace, "ConfigMap").is_empty());
        assert!(store.replace("ns", &created).await.is_ok());
    }
}
