//! Periodic scan pass of the PVC autoscaler

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{ApiResource, DynamicObject};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::controller::error::{Error, Result};
use crate::health::HealthState;
use crate::quantity::{format_bytes, parse_bytes};
use crate::store::{ObjectKey, ObjectStore, api_resource, describe, from_dynamic};
use crate::volume::annotations::{VolumeDefaults, is_enabled, parse_policy};
use crate::volume::decision::{Decision, ScalableVolume, SkipReason, check_resize, evaluate};
use crate::volume::prometheus::{MetricsSource, UsageByClaim};
use crate::volume::storage_class::StorageClasses;

/// What happened to one claim during a pass
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Resized { from: u64, to: u64 },
    MaxCapacityReached { capacity: u64, max: u64 },
    Skipped(SkipReason),
    Error(String),
}

/// Per-claim outcomes of one scan pass
#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    pub outcomes: Vec<(ObjectKey, Outcome)>,
}

impl ScanReport {
    pub fn get(&self, key: &ObjectKey) -> Option<&Outcome> {
        self.outcomes.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }

    pub fn resized(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Resized { .. }))
    }

    pub fn errors(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Error(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Grows annotated claims whose utilization crossed their threshold
pub struct VolumeAutoscaler {
    store: Arc<dyn ObjectStore>,
    metrics_source: Arc<dyn MetricsSource>,
    defaults: VolumeDefaults,
    namespace: Option<String>,
    health: Option<Arc<HealthState>>,
    claims: ApiResource,
    classes: ApiResource,
}

impl VolumeAutoscaler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics_source: Arc<dyn MetricsSource>,
        defaults: VolumeDefaults,
    ) -> Self {
        Self {
            store,
            metrics_source,
            defaults,
            namespace: None,
            health: None,
            claims: api_resource::<PersistentVolumeClaim>(),
            classes: api_resource::<StorageClass>(),
        }
    }

    /// Only scan claims in `namespace`
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Evaluate every annotated claim once
    ///
    /// Fails as a whole only when usage or the object lists cannot be read.
    /// Per-claim failures are reported in the [`ScanReport`] and never stop
    /// the remaining claims from being processed.
    #[instrument(skip(self), fields(namespace = ?self.namespace))]
    pub async fn run_pass(&self) -> Result<ScanReport> {
        let start = Instant::now();
        let result = self.scan().await;

        if let Some(health) = &self.health {
            health
                .metrics
                .record_scan(start.elapsed().as_secs_f64(), result.is_err());
            if result.is_ok() {
                health.touch();
            }
        }

        if let Ok(report) = &result {
            info!(
                claims = report.outcomes.len(),
                resized = report.resized(),
                errors = report.errors(),
                "Scan pass finished"
            );
        }
        result
    }

    async fn scan(&self) -> Result<ScanReport> {
        let usage = self.metrics_source.volume_usage().await?;
        let claims = self
            .store
            .list(&self.claims, self.namespace.as_deref())
            .await?;
        let classes = self
            .store
            .list(&self.classes, None)
            .await?
            .iter()
            .map(from_dynamic::<StorageClass>)
            .collect::<Result<Vec<_>>>()?;
        let classes = StorageClasses::new(&classes);

        let mut report = ScanReport::default();
        for obj in &claims {
            let annotations = obj.metadata.annotations.clone().unwrap_or_default();
            if !is_enabled(&annotations) {
                continue;
            }
            let key = match ObjectKey::of(obj) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping claim without name: {}", e);
                    continue;
                }
            };

            let outcome = match self.process(&key, obj, &usage, &classes).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(claim = %key, "Failed to autoscale claim: {}", e);
                    Outcome::Error(e.to_string())
                }
            };
            self.record(&key, &outcome);
            report.outcomes.push((key, outcome));
        }

        Ok(report)
    }

    async fn process(
        &self,
        key: &ObjectKey,
        obj: &DynamicObject,
        usage: &UsageByClaim,
        classes: &StorageClasses,
    ) -> Result<Outcome> {
        let annotations = obj.metadata.annotations.clone().unwrap_or_default();
        let policy = parse_policy(&annotations, &self.defaults)?;
        let claim: PersistentVolumeClaim = from_dynamic(obj)?;

        let status = claim.status.as_ref();
        if status.and_then(|s| s.phase.as_deref()) != Some("Bound") {
            return Ok(Outcome::Skipped(SkipReason::NotBound));
        }

        let requested = storage_of(
            claim
                .spec
                .as_ref()
                .and_then(|s| s.resources.as_ref())
                .and_then(|r| r.requests.as_ref())
                .and_then(|r| r.get("storage")),
        )?;
        let provisioned =
            storage_of(status.and_then(|s| s.capacity.as_ref()).and_then(|c| c.get("storage")))?;

        // The previous resize has not been picked up by the storage backend yet
        if let (Some(requested), Some(provisioned)) = (requested, provisioned) {
            if requested > provisioned {
                return Ok(Outcome::Skipped(SkipReason::ResizeInProgress));
            }
        }

        let Some(current) = requested.max(provisioned) else {
            return Err(Error::ValidationError(format!(
                "claim {} has neither a storage request nor a capacity",
                key
            )));
        };

        let Some(stats) = usage.get(key) else {
            return Ok(Outcome::Skipped(SkipReason::NoMetrics));
        };
        let Some(used_bytes) = stats.used_bytes else {
            return Ok(Outcome::Skipped(SkipReason::NoMetrics));
        };

        let class_name = claim.spec.as_ref().and_then(|s| s.storage_class_name.as_deref());
        let volume = ScalableVolume {
            key: key.clone(),
            current_capacity_bytes: current,
            observed_capacity_bytes: stats.capacity_bytes,
            used_bytes,
            capacity_inodes: stats.capacity_inodes,
            used_inodes: stats.used_inodes,
            max_allowed_capacity_bytes: policy.max_capacity_bytes,
            autoscale_enabled: true,
            expansion_supported: classes.allows_expansion(class_name),
        };

        let decision = evaluate(&volume, &policy);
        if decision.threshold_reached() {
            if let Some(health) = &self.health {
                health
                    .metrics
                    .record_threshold_reached(namespace_of(key), &key.name);
            }
        }

        match decision {
            Decision::Skip(reason) => {
                debug!(claim = %key, %reason, "Skipping claim");
                Ok(Outcome::Skipped(reason))
            }
            Decision::MaxCapacityReached { capacity, max } => {
                warn!(
                    claim = %key,
                    capacity = %format_bytes(capacity),
                    max = %format_bytes(max),
                    "Claim crossed its threshold but is already at max capacity"
                );
                Ok(Outcome::MaxCapacityReached { capacity, max })
            }
            Decision::Resize { from, to } => {
                check_resize(&volume, to)?;
                self.resize(key, to).await?;
                info!(
                    claim = %key,
                    from = %format_bytes(from),
                    to = %format_bytes(to),
                    "Requested capacity increase"
                );
                Ok(Outcome::Resized { from, to })
            }
        }
    }

    /// Set the claim's storage request to the absolute target
    async fn resize(&self, key: &ObjectKey, target: u64) -> Result<()> {
        let patch = json!({
            "spec": {
                "resources": {
                    "requests": {
                        "storage": format_bytes(target)
                    }
                }
            }
        });

        self.store
            .merge_patch(&self.claims, key, &patch)
            .await
            .map_err(|e| e.in_subresource("resize", describe(&self.claims, key)))?;
        Ok(())
    }

    fn record(&self, key: &ObjectKey, outcome: &Outcome) {
        let Some(health) = &self.health else {
            return;
        };
        let namespace = namespace_of(key);
        match outcome {
            Outcome::Resized { .. } => health.metrics.record_resized(namespace, &key.name),
            Outcome::MaxCapacityReached { .. } => health
                .metrics
                .record_max_capacity_reached(namespace, &key.name),
            Outcome::Skipped(reason) => {
                health
                    .metrics
                    .record_skipped(namespace, &key.name, reason.as_str())
            }
            Outcome::Error(_) => health.metrics.record_volume_error(namespace, &key.name),
        }
    }
}

fn namespace_of(key: &ObjectKey) -> &str {
    key.namespace.as_deref().unwrap_or_default()
}

fn storage_of(quantity: Option<&Quantity>) -> Result<Option<u64>> {
    quantity.map(|q| parse_bytes(&q.0)).transpose()
}
