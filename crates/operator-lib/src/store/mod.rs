//! Orchestration API seam
//!
//! Every read and write the reconciliation engine performs goes through
//! [`ObjectStore`]. [`KubeStore`] talks to a live API server; [`MemoryStore`]
//! keeps objects in process and records the writes it receives.

mod cluster;
mod memory;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, WriteRecord, WriteVerb};

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Namespaced object kind the engine can read and write
pub trait ClusterObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kind name of an object type, as reported in errors and logs
pub fn kind_of<K: ClusterObject>() -> String {
    K::kind(&()).to_string()
}

/// Typed access to namespaced cluster objects
///
/// `replace` and `replace_status` are optimistic: when the object carries a
/// resource version that no longer matches the stored one they fail with
/// [`crate::Error::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K>;

    /// Replace the object's spec and metadata; the stored status is kept
    async fn replace<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K>;

    /// Replace only the object's status
    async fn replace_status<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K>;

    /// Returns false when there was nothing to delete
    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Objects whose labels contain every pair in `labels`
    async fn list<K: ClusterObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;
}

pub(crate) fn object_name<K: ClusterObject>(object: &K) -> Result<&str> {
    object
        .meta()
        .name
        .as_deref()
        .ok_or(crate::Error::MissingObjectKey("metadata.name"))
}
