//! Reconciliation logic for ApiServerAutoscaler resources
//!
//! Every pass converges the coordinated HPA/VPA pair of one API server
//! deployment. Deletion tears the pair down and waits until the server has
//! dropped every managed object before the finalizer is released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{StatusManager, retry_count, spec_changed};
use crate::controller::validation::validate_spec;
use crate::coordinator::{CustomMetricsHpa, DesiredStateParameters, ReconcileOutcome};
use crate::crd::ApiServerAutoscaler;
use crate::store::{ObjectKey, api_resource};
use crate::waiter::ObjectWaiter;

/// Finalizer name for cleanup
pub const FINALIZER: &str = "autoscaling.gardener.cloud/finalizer";

/// Requeue interval after a successful pass, repairs drift on unwatched objects
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Main reconciliation function
#[instrument(skip(autoscaler, ctx), fields(name = %autoscaler.name_any(), namespace = autoscaler.namespace().unwrap_or_default()))]
pub async fn reconcile(autoscaler: Arc<ApiServerAutoscaler>, ctx: Arc<Context>) -> Result<Action> {
    let ns = autoscaler
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = autoscaler.name_any();
    let start = Instant::now();

    if autoscaler.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&autoscaler, &ctx, &ns).await;
    }

    if !has_finalizer(&autoscaler) {
        add_finalizer(&autoscaler, &ctx, &ns).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if spec_changed(&autoscaler) {
        info!(
            "Spec changed for {} (generation: {:?} -> {:?})",
            name,
            autoscaler.status.as_ref().and_then(|s| s.observed_generation),
            autoscaler.metadata.generation
        );
    } else {
        debug!("Spec unchanged for {}, checking for drift", name);
    }

    let status_manager = StatusManager::new(&autoscaler, ctx.store.as_ref());

    // A disabled autoscaler only tears down, the rest of its spec is irrelevant
    let validation = if autoscaler.spec.enabled {
        validate_spec(&autoscaler)
    } else {
        Ok(())
    };
    if let Err(e) = validation {
        warn!("Invalid spec for {}: {}", name, e);
        let _ = status_manager
            .set_failed("ValidationFailed", &e.to_string())
            .await;
        record_error(&ctx, &ns, &name);
        return Err(e);
    }

    match reconcile_autoscaler(&autoscaler, &ctx, &ns).await {
        Ok(outcome) => {
            match outcome {
                ReconcileOutcome::Enabled { .. } => {
                    let handle = CustomMetricsHpa::new(&ns, &autoscaler.spec.deployment_name);
                    status_manager
                        .set_enabled(handle.hpa_name(), handle.vpa_name())
                        .await?;
                }
                ReconcileOutcome::Disabled => status_manager.set_disabled().await?,
            }
            if let Some(ref state) = ctx.health_state {
                state
                    .metrics
                    .record_reconcile(&ns, &name, start.elapsed().as_secs_f64());
                state.touch();
            }
            info!("Reconciliation completed successfully");
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            let _ = status_manager
                .set_failed("ReconciliationFailed", &e.to_string())
                .await;
            record_error(&ctx, &ns, &name);
            Err(e)
        }
    }
}

async fn reconcile_autoscaler(
    autoscaler: &ApiServerAutoscaler,
    ctx: &Context,
    ns: &str,
) -> Result<ReconcileOutcome> {
    let store = ctx.store.as_ref();
    let handle = CustomMetricsHpa::new(ns, &autoscaler.spec.deployment_name);

    // Objects of a previous target deployment are not garbage collected while
    // this autoscaler still owns them
    let previous = autoscaler
        .status
        .as_ref()
        .and_then(|s| s.deployment_name.as_deref())
        .filter(|previous| *previous != handle.deployment_name());
    if let Some(previous) = previous {
        info!(
            "Target changed from {} to {}, removing old policies",
            previous,
            handle.deployment_name()
        );
        CustomMetricsHpa::new(ns, previous)
            .delete_from_server(store)
            .await?;
    }

    let params = DesiredStateParameters::from_autoscaler(autoscaler);
    handle.reconcile(store, &params, &ctx.tuning).await
}

fn record_error(ctx: &Context, ns: &str, name: &str) {
    if let Some(ref state) = ctx.health_state {
        state.metrics.record_error(ns, name);
    }
}

/// Error policy for the controller with exponential backoff
///
/// The attempt number is the failure count persisted in the status, so the
/// delay keeps growing across controller restarts.
pub fn error_policy(autoscaler: Arc<ApiServerAutoscaler>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = autoscaler.name_any();
    let delay = ctx
        .backoff
        .delay_for_error(error, retry_count(&autoscaler));

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

/// Check if the resource carries our finalizer
fn has_finalizer(autoscaler: &ApiServerAutoscaler) -> bool {
    autoscaler.finalizers().iter().any(|f| f == FINALIZER)
}

async fn add_finalizer(autoscaler: &ApiServerAutoscaler, ctx: &Context, ns: &str) -> Result<()> {
    let name = autoscaler.name_any();
    let mut finalizers = autoscaler.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());

    ctx.store
        .merge_patch(
            &api_resource::<ApiServerAutoscaler>(),
            &ObjectKey::namespaced(ns, &name),
            &json!({ "metadata": { "finalizers": finalizers } }),
        )
        .await?;

    info!("Added finalizer to {}", name);
    Ok(())
}

async fn remove_finalizer(autoscaler: &ApiServerAutoscaler, ctx: &Context, ns: &str) -> Result<()> {
    let name = autoscaler.name_any();
    let remaining: Vec<&String> = autoscaler
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .collect();
    let finalizers = if remaining.is_empty() {
        serde_json::Value::Null
    } else {
        json!(remaining)
    };

    ctx.store
        .merge_patch(
            &api_resource::<ApiServerAutoscaler>(),
            &ObjectKey::namespaced(ns, &name),
            &json!({ "metadata": { "finalizers": finalizers } }),
        )
        .await?;

    info!("Removed finalizer from {}", name);
    Ok(())
}

/// Tear down the policy pair, wait for it to disappear, release the finalizer
async fn handle_deletion(autoscaler: &ApiServerAutoscaler, ctx: &Context, ns: &str) -> Result<Action> {
    let name = autoscaler.name_any();
    info!("Handling deletion of {}", name);

    if !has_finalizer(autoscaler) {
        return Ok(Action::await_change());
    }

    let status_manager = StatusManager::new(autoscaler, ctx.store.as_ref());
    let _ = status_manager.set_deleting().await;

    let handle = CustomMetricsHpa::new(ns, &autoscaler.spec.deployment_name);
    handle.delete_from_server(ctx.store.as_ref()).await?;

    let waiter = ObjectWaiter::new(ctx.store.clone());
    for (resource, key) in handle.managed_objects() {
        waiter
            .wait_until_deleted(&resource, &key, ctx.tuning.wait_timeout)
            .await?;
    }

    remove_finalizer(autoscaler, ctx, ns).await?;
    Ok(Action::await_change())
}
