//! Drift classification
//!
//! Decides whether a running workload is current, can be patched in place, or
//! must be restarted. Every check is evaluated and every matched reason is
//! reported; any restart reason wins over in-place reasons.

use crate::crd::ClusterAgentSpec;
use crate::error::Result;
use crate::snapshot::ConfigSnapshot;
use crate::workload::LiveWorkload;
use k8s_openapi::api::core::v1::ResourceRequirements;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    NoChange,
    InPlaceUpdate,
    Restart,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::NoChange => "no_change",
            Verdict::InPlaceUpdate => "in_place_update",
            Verdict::Restart => "restart",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected difference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReason {
    ImageChanged { from: String, to: String },
    ResourcesChanged,
    /// Pod template setting the platform rolls out on its own
    TemplateChanged { field: &'static str },
    CredentialRotated { from: String, to: String },
    FieldChanged { field: &'static str },
}

impl DriftReason {
    /// Reasons the running process cannot pick up without a fresh start
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            DriftReason::CredentialRotated { .. } | DriftReason::FieldChanged { .. }
        )
    }
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftReason::ImageChanged { from, to } => write!(f, "image {} -> {}", from, to),
            DriftReason::ResourcesChanged => f.write_str("resources changed"),
            DriftReason::TemplateChanged { field } => write!(f, "{} updated", field),
            DriftReason::CredentialRotated { from, to } => {
                write!(f, "credential revision {} -> {}", from, to)
            }
            DriftReason::FieldChanged { field } => write!(f, "{} changed", field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    pub reasons: Vec<DriftReason>,
}

impl Classification {
    fn from_reasons(reasons: Vec<DriftReason>) -> Self {
        let verdict = if reasons.iter().any(DriftReason::requires_restart) {
            Verdict::Restart
        } else if reasons.is_empty() {
            Verdict::NoChange
        } else {
            Verdict::InPlaceUpdate
        };
        Self { verdict, reasons }
    }

    pub fn image_changed(&self) -> bool {
        self.reasons
            .iter()
            .any(|r| matches!(r, DriftReason::ImageChanged { .. }))
    }

    pub fn reason_labels(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

struct FieldCheck<'a> {
    name: &'static str,
    desired: &'a str,
    prior: &'a str,
}

/// Inputs to one classification
///
/// Checks are added with the builder methods; a check whose desired value is
/// empty or absent expresses no opinion and is skipped.
pub struct DriftInput<'a> {
    current_revision: &'a str,
    prior_revision: Option<&'a str>,
    image: Option<(&'a str, &'a str)>,
    resources: Option<(&'a ResourceRequirements, Option<&'a ResourceRequirements>)>,
    template: Vec<&'static str>,
    fields: Vec<FieldCheck<'a>>,
}

impl<'a> DriftInput<'a> {
    pub fn new(current_revision: &'a str) -> Self {
        Self {
            current_revision,
            prior_revision: None,
            image: None,
            resources: None,
            template: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Desired image against the image the live workload runs
    pub fn image(mut self, desired: &'a str, live: Option<&'a str>) -> Self {
        if let Some(live) = live {
            self.image = Some((desired, live));
        }
        self
    }

    /// Desired resources against the resources last applied
    pub fn resources(
        mut self,
        desired: Option<&'a ResourceRequirements>,
        applied: Option<&'a ResourceRequirements>,
    ) -> Self {
        self.resources = desired.map(|d| (d, applied));
        self
    }

    /// Pod template setting against its last applied value; skipped when nothing was applied
    pub fn template<T: PartialEq + ?Sized>(
        mut self,
        name: &'static str,
        desired: &T,
        applied: Option<&T>,
    ) -> Self {
        if applied.map_or(false, |applied| applied != desired) {
            self.template.push(name);
        }
        self
    }

    /// Credential revision the running process was started with
    pub fn prior_revision(mut self, revision: Option<&'a str>) -> Self {
        self.prior_revision = revision;
        self
    }

    /// Start-time-only field
    pub fn field(mut self, name: &'static str, desired: &'a str, prior: &'a str) -> Self {
        self.fields.push(FieldCheck {
            name,
            desired,
            prior,
        });
        self
    }

    pub fn classify(&self) -> Classification {
        let mut reasons = Vec::new();

        if let Some((desired, live)) = self.image {
            if !desired.is_empty() && desired != live {
                reasons.push(DriftReason::ImageChanged {
                    from: live.to_string(),
                    to: desired.to_string(),
                });
            }
        }

        if let Some((desired, applied)) = self.resources {
            if Some(desired) != applied {
                reasons.push(DriftReason::ResourcesChanged);
            }
        }

        for &field in &self.template {
            reasons.push(DriftReason::TemplateChanged { field });
        }

        if let Some(prior) = self.prior_revision {
            if prior != self.current_revision {
                reasons.push(DriftReason::CredentialRotated {
                    from: prior.to_string(),
                    to: self.current_revision.to_string(),
                });
            }
        }

        for check in &self.fields {
            if !check.desired.is_empty() && check.desired != check.prior {
                reasons.push(DriftReason::FieldChanged { field: check.name });
            }
        }

        Classification::from_reasons(reasons)
    }
}

/// Desired state a workload was last built from, stored on the workload itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedState<S> {
    pub spec: S,
    pub credential_revision: String,
}

impl<S: Serialize + DeserializeOwned> AppliedState<S> {
    pub fn new(spec: S, credential_revision: impl Into<String>) -> Self {
        Self {
            spec,
            credential_revision: credential_revision.into(),
        }
    }

    pub fn to_annotation(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_annotation(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Classify the primary agent against the state its workload was last built from
///
/// `desired` must already carry the effective image. Restart checks read the
/// applied state recorded on the workload, which is only written once a
/// restart went through; the previous snapshot stands in when no applied state
/// is readable. Without either only the in-place checks apply.
pub fn classify_agent(
    desired: &ClusterAgentSpec,
    prior: Option<&ConfigSnapshot>,
    applied: Option<&AppliedState<ClusterAgentSpec>>,
    live: &LiveWorkload,
    credential_revision: &str,
) -> Classification {
    let was = applied.map(|a| &a.spec);
    let mut input = DriftInput::new(credential_revision)
        .image(&desired.image, live.image.as_deref())
        .resources(desired.resources.as_ref(), was.and_then(|s| s.resources.as_ref()))
        .template(
            "replicas",
            &desired.replicas.unwrap_or(1),
            was.map(|s| s.replicas.unwrap_or(1)).as_ref(),
        )
        .template("env", &desired.env, was.map(|s| &s.env))
        .template("args", &desired.args, was.map(|s| &s.args))
        .template("nodeSelector", &desired.node_selector, was.map(|s| &s.node_selector))
        .template("tolerations", &desired.tolerations, was.map(|s| &s.tolerations))
        .template(
            "serviceAccountName",
            &desired.service_account_name,
            was.map(|s| &s.service_account_name),
        );

    if let Some(applied) = applied {
        let was = &applied.spec;
        input = input
            .prior_revision(Some(&applied.credential_revision))
            .field("controllerUrl", &desired.controller_url, &was.controller_url)
            .field("account", &desired.account, &was.account)
            .field("globalAccount", &desired.global_account, &was.global_account)
            .field("appName", &desired.app_name, &was.app_name)
            .field("eventServiceUrl", &desired.event_service_url, &was.event_service_url)
            .field("systemSslCert", &desired.system_ssl_cert, &was.system_ssl_cert)
            .field("agentSslCert", &desired.agent_ssl_cert, &was.agent_ssl_cert);
    } else if let Some(prior) = prior {
        input = input
            .prior_revision(Some(&prior.secret_version))
            .field("controllerUrl", &desired.controller_url, &prior.controller_url)
            .field("account", &desired.account, &prior.account)
            .field("globalAccount", &desired.global_account, &prior.global_account)
            .field("appName", &desired.app_name, &prior.app_name)
            .field(
                "eventServiceUrl",
                &desired.event_service_url,
                &prior.event_service_url,
            )
            .field("systemSslCert", &desired.system_ssl_cert, &prior.system_ssl_cert)
            .field("agentSslCert", &desired.agent_ssl_cert, &prior.agent_ssl_cert);
    }
    input.classify()
}
