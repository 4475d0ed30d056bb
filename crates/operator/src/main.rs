//! Agent Operator - lifecycle management for monitoring agents
//!
//! Runs one controller per agent family, keeping each family's workloads,
//! configuration bundles and credential object in line with its desired state.

use anyhow::{Context as _, Result};
use kube::Client;
use operator_lib::{
    health::{components, HealthRegistry},
    observability::{OperatorMetrics, StructuredLogger},
    status::HttpStatusReporter,
    store::KubeStore,
    Reconciler,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod controllers;

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::OperatorConfig::load()?;

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(fmt::layer().json())
        .init();

    info!("Starting agent-operator");

    let client = Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    for component in components::CONTROLLERS {
        health_registry.register(component).await;
    }
    health_registry.register(components::STATUS_REPORTER).await;

    let metrics = OperatorMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(OPERATOR_VERSION, config.watch_namespace.as_deref());

    let settings = Arc::new(config.settings());
    let status = Arc::new(
        HttpStatusReporter::new(settings.status_timeout)
            .context("failed to build agent status client")?,
    );
    let reconciler = Reconciler::new(
        Arc::new(KubeStore::new(client.clone())),
        settings,
        status,
        health_registry.clone(),
        logger.clone(),
    );
    let retries = controllers::RetryBackoff::new(config.retry_initial(), config.error_requeue());
    let ctx = Arc::new(controllers::Context::new(reconciler, retries));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;

    tokio::select! {
        _ = controllers::run(client, ctx, config.watch_namespace.clone()) => {
            logger.log_shutdown("controllers stopped");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
    }

    info!("Shutting down");
    api_handle.abort();

    Ok(())
}
