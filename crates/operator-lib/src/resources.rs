//! Dependent resource manager
//!
//! Fetch-or-create for the objects that surround a workload: the credential
//! secret, the generated configuration bundles, the network endpoint and the
//! custom trust bundle check. Everything except the credential is owner-linked
//! to the desired-state object so it is garbage collected with it.

use crate::crd::ClusterAgentSpec;
use crate::error::{Error, Result};
use crate::settings::OperatorSettings;
use crate::snapshot::ConfigSnapshot;
use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Workload annotation holding the desired state the workload was last built from
pub const LAST_APPLIED_ANNOTATION: &str = "monitoring.agents.dev/last-applied-desired-state";

/// Credential keys
pub const API_USER_KEY: &str = "api-user";
pub const CONTROLLER_KEY_KEY: &str = "controller-key";
pub const EVENT_KEY_KEY: &str = "event-key";

/// Labels identifying the pods of one component of one desired-state instance
pub fn selector_labels(component: &str, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), component.to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
    ])
}

/// The shared credential object and its current revision
#[derive(Debug, Clone)]
pub struct Credential {
    pub secret: Secret,
    /// Resource version of the secret; changes whenever its content is edited
    pub revision: String,
    /// True when this pass created the placeholder
    pub created: bool,
}

impl Credential {
    pub fn has_key(&self, key: &str) -> bool {
        self.secret
            .data
            .as_ref()
            .map_or(false, |data| data.contains_key(key))
    }
}

/// Ensure operations scoped to one namespace
pub struct ResourceManager<'a, C> {
    store: &'a C,
    settings: &'a OperatorSettings,
    namespace: &'a str,
}

impl<'a, C: ObjectStore> ResourceManager<'a, C> {
    pub fn new(store: &'a C, settings: &'a OperatorSettings, namespace: &'a str) -> Self {
        Self {
            store,
            settings,
            namespace,
        }
    }

    fn meta(&self, name: &str, owner: &OwnerReference) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        }
    }

    /// Fetch the credential secret, creating it with empty placeholder values
    /// when absent. The placeholder is never owner-linked and never deleted.
    pub async fn ensure_credential(&self) -> Result<Credential> {
        let name = &self.settings.credential_secret_name;
        let (secret, created) = match self.store.get::<Secret>(self.namespace, name).await? {
            Some(secret) => (secret, false),
            None => {
                let placeholder = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(self.namespace.to_string()),
                        ..Default::default()
                    },
                    data: Some(
                        [API_USER_KEY, CONTROLLER_KEY_KEY, EVENT_KEY_KEY]
                            .into_iter()
                            .map(|k| (k.to_string(), ByteString(Vec::new())))
                            .collect(),
                    ),
                    ..Default::default()
                };
                warn!(
                    namespace = %self.namespace,
                    secret = %name,
                    "Credential secret missing, creating placeholder with empty values"
                );
                (self.store.create(self.namespace, &placeholder).await?, true)
            }
        };

        let revision = secret
            .metadata
            .resource_version
            .clone()
            .ok_or(Error::MissingObjectKey("metadata.resourceVersion"))?;
        Ok(Credential {
            secret,
            revision,
            created,
        })
    }

    /// Read the persisted snapshot, build its successor and write it back
    ///
    /// `build` receives the previous snapshot. A bundle that cannot be decoded
    /// fails the call before anything is written. Returns `(previous, written)`.
    pub async fn ensure_config_bundle<F>(
        &self,
        owner: &OwnerReference,
        build: F,
    ) -> Result<(Option<ConfigSnapshot>, ConfigSnapshot)>
    where
        F: FnOnce(Option<&ConfigSnapshot>) -> ConfigSnapshot + Send,
    {
        let name = &self.settings.agent_bundle_name;
        let key = &self.settings.agent_bundle_key;
        let existing = self.store.get::<ConfigMap>(self.namespace, name).await?;

        let prior = match existing
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .and_then(|data| data.get(key))
        {
            Some(raw) => Some(ConfigSnapshot::from_json(raw)?),
            None => None,
        };

        let snapshot = build(prior.as_ref());
        let content = snapshot.to_json()?;
        self.write_bundle(existing, name, key, content, owner).await?;
        Ok((prior, snapshot))
    }

    /// Write a flat text bundle, returning its previous content
    pub async fn ensure_text_bundle(
        &self,
        owner: &OwnerReference,
        name: &str,
        key: &str,
        content: String,
    ) -> Result<Option<String>> {
        let existing = self.store.get::<ConfigMap>(self.namespace, name).await?;
        let previous = existing
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .and_then(|data| data.get(key))
            .cloned();
        self.write_bundle(existing, name, key, content, owner).await?;
        Ok(previous)
    }

    async fn write_bundle(
        &self,
        existing: Option<ConfigMap>,
        name: &str,
        key: &str,
        content: String,
        owner: &OwnerReference,
    ) -> Result<()> {
        let data = BTreeMap::from([(key.to_string(), content)]);
        match existing {
            Some(mut cm) => {
                cm.data = Some(data);
                self.store.replace(self.namespace, &cm).await?;
                debug!(namespace = %self.namespace, bundle = %name, "Configuration bundle rewritten");
            }
            None => {
                let cm = ConfigMap {
                    metadata: self.meta(name, owner),
                    data: Some(data),
                    ..Default::default()
                };
                self.store.create(self.namespace, &cm).await?;
                info!(namespace = %self.namespace, bundle = %name, "Configuration bundle created");
            }
        }
        Ok(())
    }

    /// Create the service in front of a workload's pods if it does not exist
    ///
    /// An existing service is returned untouched; port changes take effect
    /// through a workload restart.
    pub async fn ensure_endpoint(
        &self,
        owner: &OwnerReference,
        name: &str,
        selector: &BTreeMap<String, String>,
        port: i32,
    ) -> Result<Service> {
        if let Some(existing) = self.store.get::<Service>(self.namespace, name).await? {
            return Ok(existing);
        }

        let mut metadata = self.meta(name, owner);
        metadata.labels = Some(selector.clone());
        let service = Service {
            metadata,
            spec: Some(ServiceSpec {
                selector: Some(selector.clone()),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    protocol: Some("TCP".to_string()),
                    port,
                    target_port: Some(IntOrString::Int(port)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        info!(namespace = %self.namespace, service = %name, port, "Creating agent endpoint");
        self.store.create(self.namespace, &service).await
    }

    /// Require the trust bundle to exist when a custom trust store is configured
    pub async fn ensure_tls_trust_config(&self, desired: &ClusterAgentSpec) -> Result<()> {
        if desired.agent_ssl_store_name.is_empty() {
            return Ok(());
        }
        let name = &self.settings.trust_bundle_name;
        match self.store.get::<ConfigMap>(self.namespace, name).await? {
            Some(_) => Ok(()),
            None => Err(Error::MissingTrustBundle {
                name: name.clone(),
                namespace: self.namespace.to_string(),
            }),
        }
    }

    /// Best-effort removal of generated bundles; returns the names removed
    pub async fn remove_bundles(&self, names: &[&str]) -> Vec<String> {
        let mut removed = Vec::new();
        for name in names {
            match self.store.delete::<ConfigMap>(self.namespace, name).await {
                Ok(true) => removed.push(name.to_string()),
                Ok(false) => {}
                Err(e) => {
                    warn!(namespace = %self.namespace, bundle = %name, error = %e, "Failed to remove configuration bundle");
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WriteVerb};

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "monitoring.agents.dev/v1alpha1".to_string(),
            kind: "ClusterAgent".to_string(),
            name: "agent".to_string(),
            uid: "uid-agent".to_string(),
            controller: Some(true),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_credential_placeholder_created_once() {
        let store = MemoryStore::new();
        let settings = OperatorSettings::default();
        let rm = ResourceManager::new(&store, &settings, "ns");

        let first = rm.ensure_credential().await.unwrap();
        assert!(first.created);
        assert!(first.has_key(API_USER_KEY));
        assert!(first.secret.metadata.owner_references.is_none());
        let data = first.secret.data.clone().unwrap();
        assert!(data.values().all(|v| v.0.is_empty()));

        let second = rm.ensure_credential().await.unwrap();
        assert!(!second.created);
        assert_eq!(first.revision, second.revision);
        assert_eq!(store.writes(WriteVerb::Create, "Secret").len(), 1);
    }

    #[tokio::test]
    async fn test_config_bundle_returns_prior_snapshot() {
        let store = MemoryStore::new();
        let settings = OperatorSettings::default();
        let rm = ResourceManager::new(&store, &settings, "ns");

        let (prior, first) = rm
            .ensure_config_bundle(&owner(), |prior| {
                assert!(prior.is_none());
                ConfigSnapshot {
                    account: "a1".to_string(),
                    ..Default::default()
                }
            })
            .await
            .unwrap();
        assert!(prior.is_none());

        let (prior, _) = rm
            .ensure_config_bundle(&owner(), |_| ConfigSnapshot {
                account: "a2".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(prior, Some(first));
        assert_eq!(store.writes(WriteVerb::Replace, "ConfigMap").len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_bundle_fails_before_write() {
        let store = MemoryStore::new();
        let settings = OperatorSettings::default();
        store
            .insert(
                "ns",
                &ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(settings.agent_bundle_name.clone()),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(
                        settings.agent_bundle_key.clone(),
                        "{not json".to_string(),
                    )])),
                    ..Default::default()
                },
            )
            .unwrap();
        let rm = ResourceManager::new(&store, &settings, "ns");

        let err = rm
            .ensure_config_bundle(&owner(), |_| ConfigSnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_not_mutated_when_present() {
        let store = MemoryStore::new();
        let settings = OperatorSettings::default();
        let rm = ResourceManager::new(&store, &settings, "ns");
        let selector = selector_labels("cluster-agent", "agent");

        rm.ensure_endpoint(&owner(), "agent", &selector, 8989).await.unwrap();
        let again = rm.ensure_endpoint(&owner(), "agent", &selector, 9090).await.unwrap();

        let ports = again.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 8989);
        assert_eq!(store.journal().len(), 1);
    }

    #[tokio::test]
    async fn test_trust_bundle_required_for_custom_store() {
        let store = MemoryStore::new();
        let settings = OperatorSettings::default();
        let rm = ResourceManager::new(&store, &settings, "ns");

        let plain = ClusterAgentSpec::default();
        rm.ensure_tls_trust_config(&plain).await.unwrap();

        let custom = ClusterAgentSpec {
            agent_ssl_store_name: "custom.jks".to_string(),
            ..Default::default()
        };
        let err = rm.ensure_tls_trust_config(&custom).await.unwrap_err();
        assert!(matches!(err, Error::MissingTrustBundle { .. }));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_remove_bundles_skips_missing() {
        let store = MemoryStore::new();
        let settings = OperatorSettings::default();
        let rm = ResourceManager::new(&store, &settings, "ns");
        rm.ensure_text_bundle(&owner(), "one", "a.conf", "x: 1".to_string())
            .await
            .unwrap();

        let removed = rm.remove_bundles(&["one", "two"]).await;
        assert_eq!(removed, vec!["one".to_string()]);
    }
}
