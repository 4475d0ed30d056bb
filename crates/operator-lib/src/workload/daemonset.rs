use super::WorkloadShape;
use crate::crd::WorkloadReadiness;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// One-per-node process group
pub fn daemon_set(
    metadata: ObjectMeta,
    labels: &BTreeMap<String, String>,
    pod_spec: PodSpec,
) -> DaemonSet {
    DaemonSet {
        metadata,
        spec: Some(DaemonSetSpec {
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

impl WorkloadShape for DaemonSet {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }

    fn pod_template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn readiness(&self) -> WorkloadReadiness {
        let status = self.status.as_ref();
        WorkloadReadiness {
            desired: status.map(|s| s.desired_number_scheduled).unwrap_or(0),
            ready: status.map(|s| s.number_ready).unwrap_or(0),
        }
    }

    /// One pod per eligible node; there is no count to set
    fn replicas(&self) -> Option<i32> {
        None
    }

    fn set_replicas(&mut self, _replicas: i32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DaemonSetStatus;

    #[test]
    fn test_readiness_counts_scheduled_nodes() {
        let labels = BTreeMap::from([("app".to_string(), "viz".to_string())]);
        let mut ds = daemon_set(ObjectMeta::default(), &labels, PodSpec::default());
        assert!(!ds.readiness().is_ready());

        ds.status = Some(DaemonSetStatus {
            desired_number_scheduled: 3,
            number_ready: 3,
            ..Default::default()
        });
        assert_eq!(ds.readiness(), WorkloadReadiness { desired: 3, ready: 3 });
    }
}
