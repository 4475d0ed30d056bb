//! Health check infrastructure for the operator
//!
//! Provides component health tracking and status reporting for
//! Kubernetes liveness and readiness probes.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Compute overall status from component statuses
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const AGENT_CONTROLLER: &str = "agent_controller";
    pub const COLLECTOR_CONTROLLER: &str = "collector_controller";
    pub const INFRAVIZ_CONTROLLER: &str = "infraviz_controller";
    pub const STATUS_REPORTER: &str = "status_reporter";

    /// Components whose failure makes the operator not ready
    pub const CONTROLLERS: [&str; 3] = [AGENT_CONTROLLER, COLLECTOR_CONTROLLER, INFRAVIZ_CONTROLLER];
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Update component health status
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Mark component as healthy
    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Mark component as degraded
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    /// Mark component as unhealthy
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Fold the outcome of a reconciliation pass into a controller's health
    ///
    /// Desired-state configuration errors degrade the controller; any other
    /// failure marks it unhealthy until the next successful pass.
    pub async fn record_pass(&self, name: &str, error: Option<&Error>) {
        match error {
            None => self.set_healthy(name).await,
            Some(e) if e.is_config_error() => self.set_degraded(name, e.to_string()).await,
            Some(e) => self.set_unhealthy(name, e.to_string()).await,
        }
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let critical_healthy = {
            let registered = self.components.read().await;
            components::CONTROLLERS.iter().all(|name| {
                registered
                    .get(*name)
                    .map_or(true, |h| h.status.is_operational())
            })
        };

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Controllers not yet started".to_string()),
            }
        } else if !critical_healthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Controller unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_health_registry_component_registration() {
        let registry = HealthRegistry::new();
        registry.register(components::AGENT_CONTROLLER).await;

        let health = registry.health().await;
        assert!(health.components.contains_key(components::AGENT_CONTROLLER));
        assert_eq!(
            health.components[components::AGENT_CONTROLLER].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_health_registry_degraded_status() {
        let registry = HealthRegistry::new();
        registry.register(components::AGENT_CONTROLLER).await;
        registry.register(components::STATUS_REPORTER).await;

        registry.set_degraded(components::AGENT_CONTROLLER, "Status endpoint timing out").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_health_registry_unhealthy_status() {
        let registry = HealthRegistry::new();
        registry.register(components::AGENT_CONTROLLER).await;
        registry.register(components::STATUS_REPORTER).await;

        registry.set_unhealthy(components::AGENT_CONTROLLER, "Watch stream ended").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_ready_when_set() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
    }

    #[tokio::test]
    async fn test_readiness_ignores_status_reporter_failure() {
        let registry = HealthRegistry::new();
        registry.register(components::STATUS_REPORTER).await;
        registry.set_ready(true).await;
        registry.set_unhealthy(components::STATUS_REPORTER, "Timed out").await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::AGENT_CONTROLLER).await;
        registry.set_ready(true).await;
        registry.set_unhealthy(components::AGENT_CONTROLLER, "Failed").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
    }

    #[tokio::test]
    async fn test_record_pass_maps_error_classes() {
        let registry = HealthRegistry::new();
        let malformed = Error::MalformedEndpoint {
            url: String::new(),
            reason: "empty".to_string(),
        };
        registry
            .record_pass(components::AGENT_CONTROLLER, Some(&malformed))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        let missing = Error::MissingObjectKey("metadata.uid");
        registry
            .record_pass(components::AGENT_CONTROLLER, Some(&missing))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.record_pass(components::AGENT_CONTROLLER, None).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }
}
