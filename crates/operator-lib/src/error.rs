//! Error taxonomy for the reconciliation engine

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by a reconciliation pass
#[derive(Debug, Error)]
pub enum Error {
    /// Expected on the create path; callers translate it into "construct and create"
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Optimistic-concurrency collision on update
    #[error("conflicting update of {kind} {namespace}/{name}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("malformed controller endpoint '{url}': {reason}")]
    MalformedEndpoint { url: String, reason: String },

    #[error("invalid filter pattern '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("custom trust store requested but config map {name} was not found in namespace {namespace}; provision the trust bundle before enabling it")]
    MissingTrustBundle { name: String, namespace: String },

    #[error("agent status unavailable: {0}")]
    StatusUnavailable(String),

    #[error("configuration bundle serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("no running pods found for {0}")]
    NoPodsToRestart(String),

    #[error("orchestration API error: {0}")]
    Kube(#[source] kube::Error),
}

impl Error {
    /// True for errors caused by the desired-state content rather than the cluster
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedEndpoint { .. }
                | Error::InvalidFilter { .. }
                | Error::MissingTrustBundle { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Label used for metrics and structured logs
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::AlreadyExists { .. } => "already_exists",
            Error::MalformedEndpoint { .. } => "malformed_endpoint",
            Error::InvalidFilter { .. } => "invalid_filter",
            Error::MissingTrustBundle { .. } => "missing_trust_bundle",
            Error::StatusUnavailable(_) => "status_unavailable",
            Error::Serialization(_) => "serialization",
            Error::MissingObjectKey(_) => "missing_object_key",
            Error::NoPodsToRestart(_) => "no_pods",
            Error::Kube(_) => "api",
        }
    }
}
