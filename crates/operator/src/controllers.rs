//! Watch wiring between the orchestration API and the reconciliation engine
//!
//! One `kube::runtime::Controller` per desired-state kind. Each also watches the
//! objects the engine generates so edits or deletions of them trigger a pass for
//! their owner.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, Resource, ResourceExt};
use operator_lib::crd::{ClusterAgent, ClusterCollector, InfraViz};
use operator_lib::lifecycle::{FAMILY_AGENT, FAMILY_COLLECTOR, FAMILY_INFRAVIZ};
use operator_lib::store::KubeStore;
use operator_lib::{Error, PassOutcome, Reconciler, ResourceKey};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// Retry delays for failed passes, tracked per object
///
/// The first retry follows almost immediately; every further consecutive
/// failure doubles the delay up to `max`. A successful pass resets the count.
pub struct RetryBackoff {
    initial: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl RetryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failure and return the delay before the next attempt
    pub fn on_failure(&self, key: &str) -> Duration {
        let mut failures = self.failures();
        let attempt = failures.entry(key.to_string()).or_insert(0);
        *attempt = attempt.saturating_add(1);
        let exponent = (*attempt - 1).min(16);
        self.initial.saturating_mul(1 << exponent).min(self.max)
    }

    pub fn on_success(&self, key: &str) {
        self.failures().remove(key);
    }

    /// Delay for errors only an edit of the desired state can clear
    pub fn config_error_delay(&self) -> Duration {
        self.max * 4
    }
}

/// Shared state handed to every reconcile call
pub struct Context {
    reconciler: Reconciler<KubeStore>,
    retries: RetryBackoff,
}

impl Context {
    pub fn new(reconciler: Reconciler<KubeStore>, retries: RetryBackoff) -> Self {
        Self {
            reconciler,
            retries,
        }
    }

    /// Map a pass result to a controller action, clearing the object's retry count on success
    fn settle(&self, key: String, result: Result<PassOutcome, Error>) -> Result<Action, Error> {
        let outcome = result?;
        self.retries.on_success(&key);
        Ok(into_action(outcome))
    }
}

fn retry_key<K: Resource<DynamicType = ()>>(object: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        object.namespace().unwrap_or_default(),
        object.name_any()
    )
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Controller for `K` that also reacts to its generated configuration bundles
fn controller_for<K>(client: &Client, namespace: Option<&str>) -> Controller<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    Controller::new(scoped_api::<K>(client, namespace), watcher::Config::default())
        .owns(scoped_api::<ConfigMap>(client, namespace), watcher::Config::default())
}

fn into_action(outcome: PassOutcome) -> Action {
    match outcome.requeue_after {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

async fn reconcile_agent(object: Arc<ClusterAgent>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ResourceKey::of(object.as_ref())?;
    let result = ctx.reconciler.reconcile_agent(&key).await;
    ctx.settle(retry_key(object.as_ref()), result)
}

async fn reconcile_collector(
    object: Arc<ClusterCollector>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let key = ResourceKey::of(object.as_ref())?;
    let result = ctx.reconciler.reconcile_collector(&key).await;
    ctx.settle(retry_key(object.as_ref()), result)
}

async fn reconcile_infraviz(object: Arc<InfraViz>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ResourceKey::of(object.as_ref())?;
    let result = ctx.reconciler.reconcile_infraviz(&key).await;
    ctx.settle(retry_key(object.as_ref()), result)
}

/// Failed passes are retried with per-object backoff; the engine already logged the cause
fn error_policy<K: Resource<DynamicType = ()>>(
    object: Arc<K>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    let delay = if error.is_config_error() {
        // Desired-state errors clear on the next edit
        ctx.retries.config_error_delay()
    } else {
        ctx.retries.on_failure(&retry_key(object.as_ref()))
    };
    warn!(
        name = %object.name_any(),
        error = %error,
        retry_ms = delay.as_millis() as u64,
        "Reconcile failed, retrying"
    );
    Action::requeue(delay)
}

async fn drain<K, S>(family: &'static str, stream: S)
where
    K: Resource,
    S: Stream<Item = Result<(ObjectRef<K>, Action), controller::Error<Error, watcher::Error>>>,
{
    tokio::pin!(stream);
    while let Some(result) = stream.next().await {
        match result {
            Ok((object, _)) => debug!(family, name = %object.name, "Pass complete"),
            Err(e) => warn!(family, error = %e, "Controller error"),
        }
    }
}

/// Run all three controllers until shutdown
pub async fn run(client: Client, ctx: Arc<Context>, namespace: Option<String>) {
    let ns = namespace.as_deref();

    let agents = controller_for::<ClusterAgent>(&client, ns)
        .owns(scoped_api::<Deployment>(&client, ns), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_agent, error_policy, ctx.clone());

    let collectors = controller_for::<ClusterCollector>(&client, ns)
        .owns(scoped_api::<Deployment>(&client, ns), watcher::Config::default())
        .owns(scoped_api::<DaemonSet>(&client, ns), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_collector, error_policy, ctx.clone());

    let infraviz = controller_for::<InfraViz>(&client, ns)
        .owns(scoped_api::<DaemonSet>(&client, ns), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_infraviz, error_policy, ctx);

    tokio::join!(
        drain(FAMILY_AGENT, agents),
        drain(FAMILY_COLLECTOR, collectors),
        drain(FAMILY_INFRAVIZ, infraviz),
    );
}
