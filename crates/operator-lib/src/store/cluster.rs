use super::{kind_of, object_name, ClusterObject, ObjectStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// [`ObjectStore`] backed by the cluster API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: ClusterObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_api_error<K: ClusterObject>(err: kube::Error, namespace: &str, name: &str) -> Error {
    let kind = kind_of::<K>();
    let namespace = namespace.to_string();
    let name = name.to_string();
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
            kind,
            namespace,
            name,
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind,
                namespace,
                name,
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind,
            namespace,
            name,
        },
        other => Error::Kube(other),
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_api_error::<K>(e, namespace, name))
    }

    async fn create<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?;
        debug!(kind = %kind_of::<K>(), namespace, name, "Creating object");
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(e, namespace, name))
    }

    async fn replace<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?;
        debug!(kind = %kind_of::<K>(), namespace, name, "Replacing object");
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(e, namespace, name))
    }

    async fn replace_status<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?;
        let body = serde_json::to_vec(object)?;
        self.api::<K>(namespace)
            .replace_status(name, &PostParams::default(), body)
            .await
            .map_err(|e| map_api_error::<K>(e, namespace, name))
    }

    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        debug!(kind = %kind_of::<K>(), namespace, name, "Deleting object");
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(map_api_error::<K>(e, namespace, name)),
        }
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| map_api_error::<K>(e, namespace, ""))?;
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_status_codes_map_to_taxonomy() {
        let err = map_api_error::<ConfigMap>(api_error(404, "NotFound"), "default", "cfg");
        assert!(err.is_not_found());

        let err = map_api_error::<ConfigMap>(api_error(409, "Conflict"), "default", "cfg");
        assert!(err.is_conflict());

        let err = map_api_error::<ConfigMap>(api_error(409, "AlreadyExists"), "default", "cfg");
        assert!(matches!(err, Error::AlreadyExists { .. }));

        let err = map_api_error::<ConfigMap>(api_error(500, "InternalError"), "default", "cfg");
        assert!(matches!(err, Error::Kube(_)));
    }

    #[test]
    fn test_label_selector() {
        let labels = BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "cluster-agent".to_string()),
            ("app.kubernetes.io/instance".to_string(), "prod".to_string()),
        ]);
        assert_eq!(
            label_selector(&labels),
            "app.kubernetes.io/instance=prod,app.kubernetes.io/name=cluster-agent"
        );
    }
}
