//! Operator library for monitoring agent workloads
//!
//! This crate provides the core functionality for:
//! - Desired-state resources for the agent families
//! - Dependent objects (credential, configuration bundles, endpoint)
//! - Drift classification and workload lifecycle
//! - Agent status reporting
//! - Health checks and observability

pub mod bundle;
pub mod crd;
pub mod drift;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resources;
pub mod settings;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod workload;

pub use error::{Error, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{PassOutcome, Phase, Reconciler, ResourceKey};
pub use observability::{OperatorMetrics, StructuredLogger};
pub use settings::OperatorSettings;
