//! Operator configuration

use anyhow::{Context, Result};
use operator_lib::OperatorSettings;
use serde::Deserialize;
use std::time::Duration;

/// Operator process configuration, read from `OPERATOR_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Restrict all controllers to one namespace; cluster-wide when unset
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Delay before a pass is re-invoked after a change
    #[serde(default = "default_requeue_secs")]
    pub requeue_secs: u64,

    /// Budget for one agent status request
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,

    /// First retry delay after a failed pass; doubles per consecutive failure
    #[serde(default = "default_retry_initial_millis")]
    pub retry_initial_millis: u64,

    /// Ceiling for the retry delay of a failed pass
    #[serde(default = "default_error_requeue_secs")]
    pub error_requeue_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "agent-operator".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_requeue_secs() -> u64 {
    60
}

fn default_status_timeout_secs() -> u64 {
    10
}

fn default_retry_initial_millis() -> u64 {
    500
}

fn default_error_requeue_secs() -> u64 {
    15
}

impl OperatorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("OPERATOR"))
            .build()?;

        config
            .try_deserialize()
            .context("invalid OPERATOR_* configuration")
    }

    /// Engine settings with this process's timing knobs applied
    pub fn settings(&self) -> OperatorSettings {
        OperatorSettings {
            requeue_delay: Duration::from_secs(self.requeue_secs),
            status_timeout: Duration::from_secs(self.status_timeout_secs),
            ..Default::default()
        }
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_millis)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_overrides(pairs: &[(&str, &str)]) -> OperatorConfig {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_overrides(&[]);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.log_filter, "info");

        let settings = config.settings();
        assert_eq!(settings.requeue_delay, Duration::from_secs(60));
        assert_eq!(settings.status_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_initial(), Duration::from_millis(500));
        assert_eq!(config.error_requeue(), Duration::from_secs(15));
    }

    #[test]
    fn test_overrides_flow_into_settings() {
        let config = from_overrides(&[
            ("api_port", "9090"),
            ("watch_namespace", "monitoring"),
            ("requeue_secs", "30"),
        ]);
        assert_eq!(config.api_port, 9090);
        assert_eq!(config.watch_namespace.as_deref(), Some("monitoring"));
        assert_eq!(config.settings().requeue_delay, Duration::from_secs(30));
        assert_eq!(config.settings().agent_server_port, 8989);
    }
}
