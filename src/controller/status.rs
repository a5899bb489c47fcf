//! Status and conditions management for ApiServerAutoscaler resources
//!
//! This module provides utilities for managing Kubernetes-style conditions
//! and updating the status subresource.

use chrono::Utc;
use kube::ResourceExt;
use serde_json::{Value, json};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::{ApiServerAutoscaler, ApiServerAutoscalerStatus, AutoscalerPhase, Condition};
use crate::store::{ObjectKey, ObjectStore, api_resource};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// HPA and VPA reflect the current spec
    pub const READY: &str = "Ready";
    /// Policy objects are being created, changed or removed
    pub const PROGRESSING: &str = "Progressing";
    /// The last reconciliation failed
    pub const DEGRADED: &str = "Degraded";
    /// Spec passed validation
    pub const CONFIG_VALID: &str = "ConfigurationValid";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    ///
    /// The transition time only moves when the status changes.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation: self.generation,
            });
        }
        self
    }

    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::READY, bool_status(is_ready), reason, message)
    }

    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        self.set_condition(
            condition_types::PROGRESSING,
            bool_status(is_progressing),
            reason,
            message,
        )
    }

    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::DEGRADED, bool_status(is_degraded), reason, message)
    }

    pub fn config_valid(self, is_valid: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::CONFIG_VALID, bool_status(is_valid), reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

fn bool_status(value: bool) -> &'static str {
    if value {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    }
}

/// Status manager for ApiServerAutoscaler resources
pub struct StatusManager<'a> {
    autoscaler: &'a ApiServerAutoscaler,
    store: &'a dyn ObjectStore,
}

impl<'a> StatusManager<'a> {
    pub fn new(autoscaler: &'a ApiServerAutoscaler, store: &'a dyn ObjectStore) -> Self {
        Self { autoscaler, store }
    }

    /// Replace the status subresource
    ///
    /// Nothing is written when only `lastReconcileTime` would change.
    pub async fn update(&self, status: ApiServerAutoscalerStatus) -> Result<()> {
        if self
            .autoscaler
            .status
            .as_ref()
            .is_some_and(|current| same_status(current, &status))
        {
            debug!("Status unchanged, skipping update");
            return Ok(());
        }

        let namespace = self
            .autoscaler
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let key = ObjectKey::namespaced(namespace, self.autoscaler.name_any());

        self.store
            .merge_patch_status(
                &api_resource::<ApiServerAutoscaler>(),
                &key,
                &json!({ "status": status_patch(&status)? }),
            )
            .await?;
        Ok(())
    }

    /// Record that the HPA/VPA pair reflects the current spec
    pub async fn set_enabled(&self, hpa_name: String, vpa_name: String) -> Result<()> {
        let conditions = self
            .conditions()
            .config_valid(true, "Valid", "Spec passed validation")
            .ready(true, "PoliciesApplied", "HPA and VPA reflect the current spec")
            .progressing(false, "Stable", "Autoscaling policies are up to date")
            .degraded(false, "Healthy", "Last reconciliation succeeded")
            .build();

        self.update(ApiServerAutoscalerStatus {
            phase: AutoscalerPhase::Enabled,
            deployment_name: Some(self.autoscaler.spec.deployment_name.clone()),
            hpa_name: Some(hpa_name),
            vpa_name: Some(vpa_name),
            observed_generation: self.autoscaler.metadata.generation,
            last_error: None,
            retry_count: None,
            last_reconcile_time: Some(Utc::now().to_rfc3339()),
            conditions,
        })
        .await
    }

    /// Record that no policy objects remain on the server
    pub async fn set_disabled(&self) -> Result<()> {
        let conditions = self
            .conditions()
            .config_valid(true, "Valid", "Spec passed validation")
            .ready(false, "Disabled", "Autoscaling is disabled")
            .progressing(false, "Stable", "No policy objects are present")
            .degraded(false, "Healthy", "Last reconciliation succeeded")
            .build();

        self.update(ApiServerAutoscalerStatus {
            phase: AutoscalerPhase::Disabled,
            deployment_name: None,
            hpa_name: None,
            vpa_name: None,
            observed_generation: self.autoscaler.metadata.generation,
            last_error: None,
            retry_count: None,
            last_reconcile_time: Some(Utc::now().to_rfc3339()),
            conditions,
        })
        .await
    }

    /// Record a failed reconciliation and bump the retry count
    pub async fn set_failed(&self, reason: &str, message: &str) -> Result<()> {
        let existing = self.autoscaler.status.as_ref();
        let config_valid = reason != "ValidationFailed";

        let conditions = self
            .conditions()
            .config_valid(
                config_valid,
                if config_valid { "Valid" } else { reason },
                if config_valid { "Spec passed validation" } else { message },
            )
            .ready(false, reason, message)
            .progressing(false, "Failed", message)
            .degraded(true, reason, message)
            .build();

        self.update(ApiServerAutoscalerStatus {
            phase: AutoscalerPhase::Failed,
            // Keep pointing at whatever is still on the server
            deployment_name: existing.and_then(|s| s.deployment_name.clone()),
            hpa_name: existing.and_then(|s| s.hpa_name.clone()),
            vpa_name: existing.and_then(|s| s.vpa_name.clone()),
            observed_generation: self.autoscaler.metadata.generation,
            last_error: Some(message.to_string()),
            retry_count: Some(retry_count(self.autoscaler) + 1),
            last_reconcile_time: Some(Utc::now().to_rfc3339()),
            conditions,
        })
        .await
    }

    /// Record that teardown has started
    pub async fn set_deleting(&self) -> Result<()> {
        let existing = self.autoscaler.status.as_ref();
        let conditions = self
            .conditions()
            .ready(false, "Deleting", "Autoscaler is being deleted")
            .progressing(true, "Terminating", "Policy objects are being removed")
            .build();

        self.update(ApiServerAutoscalerStatus {
            phase: AutoscalerPhase::Deleting,
            deployment_name: existing.and_then(|s| s.deployment_name.clone()),
            hpa_name: existing.and_then(|s| s.hpa_name.clone()),
            vpa_name: existing.and_then(|s| s.vpa_name.clone()),
            observed_generation: self.autoscaler.metadata.generation,
            last_error: None,
            retry_count: None,
            last_reconcile_time: existing.and_then(|s| s.last_reconcile_time.clone()),
            conditions,
        })
        .await
    }

    fn conditions(&self) -> ConditionBuilder {
        let existing = self
            .autoscaler
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        ConditionBuilder::from_existing(existing, self.autoscaler.metadata.generation)
    }
}

/// Optional status fields that a merge patch must clear explicitly
const CLEARABLE_FIELDS: &[&str] = &[
    "deploymentName",
    "hpaName",
    "vpaName",
    "lastError",
    "retryCount",
    "lastReconcileTime",
];

/// Merge patch body for `status`, with `null` for every unset optional field
fn status_patch(status: &ApiServerAutoscalerStatus) -> Result<Value> {
    let mut patch = serde_json::to_value(status)?;
    if let Value::Object(fields) = &mut patch {
        for field in CLEARABLE_FIELDS {
            fields.entry(*field).or_insert(Value::Null);
        }
    }
    Ok(patch)
}

fn same_status(current: &ApiServerAutoscalerStatus, next: &ApiServerAutoscalerStatus) -> bool {
    let untimed = |status: &ApiServerAutoscalerStatus| ApiServerAutoscalerStatus {
        last_reconcile_time: None,
        ..status.clone()
    };
    untimed(current) == untimed(next)
}

/// Check if the spec has changed since the last observed generation
pub fn spec_changed(autoscaler: &ApiServerAutoscaler) -> bool {
    let current_generation = autoscaler.metadata.generation;
    let observed_generation = autoscaler
        .status
        .as_ref()
        .and_then(|s| s.observed_generation);

    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        _ => true,
    }
}

/// Consecutive failures recorded in the status
pub fn retry_count(autoscaler: &ApiServerAutoscaler) -> u32 {
    autoscaler
        .status
        .as_ref()
        .and_then(|s| s.retry_count)
        .unwrap_or(0)
}
