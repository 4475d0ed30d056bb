//! Observability infrastructure for the operator
//!
//! Provides:
//! - Prometheus metrics (reconcile latency, pass outcomes, drift verdicts, restarts)
//! - Structured JSON logging with tracing

use crate::drift::Classification;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconcile latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

struct OperatorMetricsInner {
    reconcile_duration_seconds: HistogramVec,
    reconcile_passes: IntCounterVec,
    drift_verdicts: IntCounterVec,
    workload_restarts: IntCounterVec,
    status_fetch_failures: IntCounter,
    credential_placeholders: IntCounter,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_duration_seconds: register_histogram_vec!(
                "agent_operator_reconcile_duration_seconds",
                "Time spent in one reconciliation pass",
                &["family"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            reconcile_passes: register_int_counter_vec!(
                "agent_operator_reconcile_passes_total",
                "Reconciliation passes by family and outcome",
                &["family", "outcome"]
            )
            .expect("Failed to register reconcile_passes"),

            drift_verdicts: register_int_counter_vec!(
                "agent_operator_drift_verdicts_total",
                "Drift classifications by family and verdict",
                &["family", "verdict"]
            )
            .expect("Failed to register drift_verdicts"),

            workload_restarts: register_int_counter_vec!(
                "agent_operator_workload_restarts_total",
                "Forced workload restarts",
                &["family"]
            )
            .expect("Failed to register workload_restarts"),

            status_fetch_failures: register_int_counter!(
                "agent_operator_status_fetch_failures_total",
                "Agent self-status queries that failed"
            )
            .expect("Failed to register status_fetch_failures"),

            credential_placeholders: register_int_counter!(
                "agent_operator_credential_placeholders_total",
                "Placeholder credential secrets created"
            )
            .expect("Failed to register credential_placeholders"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct OperatorMetrics {
    _private: (),
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OperatorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_reconcile(&self, family: &str, outcome: &str, duration_secs: f64) {
        let inner = self.inner();
        inner
            .reconcile_duration_seconds
            .with_label_values(&[family])
            .observe(duration_secs);
        inner
            .reconcile_passes
            .with_label_values(&[family, outcome])
            .inc();
    }

    pub fn inc_verdict(&self, family: &str, verdict: &str) {
        self.inner()
            .drift_verdicts
            .with_label_values(&[family, verdict])
            .inc();
    }

    pub fn inc_restarts(&self, family: &str) {
        self.inner().workload_restarts.with_label_values(&[family]).inc();
    }

    pub fn inc_status_fetch_failures(&self) {
        self.inner().status_fetch_failures.inc();
    }

    pub fn inc_credential_placeholders(&self) {
        self.inner().credential_placeholders.inc();
    }
}

/// Structured logger for operator events
///
/// Every record carries an `event` tag and the operator instance name.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, watch_namespace: Option<&str>) {
        info!(
            event = "operator_started",
            instance = %self.instance,
            operator_version = %version,
            watch_namespace = watch_namespace.unwrap_or("*"),
            "Agent operator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Agent operator shutting down"
        );
    }

    pub fn log_reconcile_started(&self, family: &str, namespace: &str, name: &str) {
        info!(
            event = "reconcile_started",
            instance = %self.instance,
            family = %family,
            namespace = %namespace,
            name = %name,
            "Reconciliation pass started"
        );
    }

    /// Log a classification with every matched reason
    pub fn log_verdict(&self, family: &str, namespace: &str, name: &str, result: &Classification) {
        if result.reasons.is_empty() {
            info!(
                event = "drift_checked",
                instance = %self.instance,
                family = %family,
                namespace = %namespace,
                name = %name,
                verdict = %result.verdict,
                "No drift detected"
            );
        } else {
            info!(
                event = "drift_detected",
                instance = %self.instance,
                family = %family,
                namespace = %namespace,
                name = %name,
                verdict = %result.verdict,
                reasons = ?result.reason_labels(),
                "Drift detected"
            );
        }
    }

    pub fn log_workload_restarted(&self, family: &str, namespace: &str, workload: &str, pods: &[String]) {
        warn!(
            event = "workload_restarted",
            instance = %self.instance,
            family = %family,
            namespace = %namespace,
            workload = %workload,
            pods = ?pods,
            "Forced workload restart"
        );
    }

    pub fn log_status_unavailable(&self, family: &str, namespace: &str, name: &str, error: &str) {
        warn!(
            event = "status_unavailable",
            instance = %self.instance,
            family = %family,
            namespace = %namespace,
            name = %name,
            error = %error,
            "Agent status unavailable, keeping previous status"
        );
    }

    pub fn log_credential_placeholder(&self, namespace: &str, secret: &str) {
        warn!(
            event = "credential_placeholder_created",
            instance = %self.instance,
            namespace = %namespace,
            secret = %secret,
            "Credential secret created with empty values; populate it to start the agent"
        );
    }

    pub fn log_cleanup(&self, family: &str, namespace: &str, name: &str, removed: &[String]) {
        info!(
            event = "resource_cleanup",
            instance = %self.instance,
            family = %family,
            namespace = %namespace,
            name = %name,
            removed = ?removed,
            "Desired state removed, generated bundles cleaned up"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::{DriftReason, Verdict};

    #[test]
    fn test_operator_metrics_creation() {
        let metrics = OperatorMetrics::new();
        metrics.observe_reconcile("agent", "success", 0.01);
        metrics.inc_verdict("agent", "restart");
        metrics.inc_restarts("agent");
        metrics.inc_status_fetch_failures();
        metrics.inc_credential_placeholders();

        let second = OperatorMetrics::new();
        second.inc_restarts("collector");
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("operator-0");
        assert_eq!(logger.instance, "operator-0");

        logger.log_verdict(
            "agent",
            "ns",
            "agent",
            &Classification {
                verdict: Verdict::Restart,
                reasons: vec![DriftReason::FieldChanged { field: "account" }],
            },
        );
    }
}
