use super::WorkloadShape;
use crate::crd::WorkloadReadiness;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Scaled process group with `replicas` pods
pub fn deployment(
    metadata: ObjectMeta,
    labels: &BTreeMap<String, String>,
    replicas: i32,
    pod_spec: PodSpec,
) -> Deployment {
    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl WorkloadShape for Deployment {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }

    fn pod_template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn readiness(&self) -> WorkloadReadiness {
        WorkloadReadiness {
            desired: self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            ready: self
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
        }
    }

    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|s| s.replicas)
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    #[test]
    fn test_readiness_from_status() {
        let labels = BTreeMap::from([("app".to_string(), "agent".to_string())]);
        let mut d = deployment(ObjectMeta::default(), &labels, 2, PodSpec::default());
        assert_eq!(d.readiness(), WorkloadReadiness { desired: 2, ready: 0 });

        d.status = Some(DeploymentStatus {
            ready_replicas: Some(2),
            ..Default::default()
        });
        assert!(d.readiness().is_ready());
    }

    #[test]
    fn test_set_replicas() {
        let labels = BTreeMap::from([("app".to_string(), "agent".to_string())]);
        let mut d = deployment(ObjectMeta::default(), &labels, 1, PodSpec::default());
        d.set_replicas(3);
        assert_eq!(d.replicas(), Some(3));
    }
}
