pub mod config;
pub mod controller;
pub mod coordinator;
pub mod crd;
pub mod health;
pub mod quantity;
pub mod resources;
pub mod store;
pub mod volume;
pub mod waiter;

pub use config::{CoordinatorTuning, OperatorConfig, VolumeConfig};
pub use controller::{BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use coordinator::{CustomMetricsHpa, DesiredStateParameters, ReconcileOutcome};
pub use crd::ApiServerAutoscaler;
pub use health::{HealthState, Metrics};
pub use store::{KubeStore, ObjectKey, ObjectStore};
pub use volume::VolumeAutoscaler;
pub use waiter::ObjectWaiter;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::time::MissedTickBehavior;

use crate::resources::vpa::vpa_resource;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the ApiServerAutoscaler controller.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// Changes to owned HPAs, VPAs and access secrets trigger a reconciliation of
/// their owner, which reverts manual edits.
pub async fn run_controller_scoped(
    client: Client,
    tuning: CoordinatorTuning,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for ApiServerAutoscaler resources (scope: {})",
        scope_msg
    );

    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(Context::new(store, tuning).with_health(health_state));

    let autoscalers: Api<ApiServerAutoscaler> = scoped_api(client.clone(), namespace);
    let hpas: Api<HorizontalPodAutoscaler> = scoped_api(client.clone(), namespace);
    let secrets: Api<Secret> = scoped_api(client.clone(), namespace);
    let vpa = vpa_resource();
    let vpas: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &vpa),
        None => Api::all_with(client.clone(), &vpa),
    };

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(autoscalers, watcher_config.clone())
        .owns(hpas, watcher_config.clone())
        .owns(secrets, watcher_config.clone())
        .owns_with(vpas, vpa, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events of owned objects can outlive their owner
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    tracing::error!("Controller stream ended unexpectedly");
}

/// Run PVC autoscaler passes forever, one every `interval`.
///
/// A failed pass is logged and the next one runs on schedule. Passes never
/// overlap: a pass that overruns the interval delays the next tick.
pub async fn run_volume_autoscaler(autoscaler: VolumeAutoscaler, interval: Duration) {
    tracing::info!("Starting PVC autoscaler (interval: {:?})", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = autoscaler.run_pass().await {
            tracing::warn!("PVC autoscaler pass failed: {}", e);
        }
    }
}
