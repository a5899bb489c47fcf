//! Test fixtures and builders for claims, storage classes and autoscalers
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let claim = PvcBuilder::new("shoot--dev--a", "prometheus-db")
//!     .autoscaled("20Gi")
//!     .size("10Gi")
//!     .build();
//! let autoscaler = ApiServerAutoscalerBuilder::new("kube-apiserver", "shoot--dev--a")
//!     .with_replicas(1, 4)
//!     .build();
//! ```

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, Secret,
    VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;

use gardener_scaling::crd::{
    ApiServerAutoscaler, ApiServerAutoscalerSpec, ApiServerAutoscalerStatus, TuningOverrides,
};
use gardener_scaling::resources::access_secret::CA_BUNDLE_KEY;
use gardener_scaling::volume::annotations::{IS_ENABLED, MAX_CAPACITY};

pub const NAMESPACE: &str = "shoot--dev--a";
pub const STORAGE_CLASS: &str = "standard";

// =============================================================================
// PersistentVolumeClaims
// =============================================================================

/// Builder for PersistentVolumeClaims as the autoscaler sees them
pub struct PvcBuilder {
    namespace: String,
    name: String,
    annotations: BTreeMap<String, String>,
    requested: Option<String>,
    capacity: Option<String>,
    storage_class: Option<String>,
    phase: Option<String>,
}

impl PvcBuilder {
    /// A bound 10Gi claim in the standard class, not yet opted in
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            annotations: BTreeMap::new(),
            requested: Some("10Gi".to_string()),
            capacity: Some("10Gi".to_string()),
            storage_class: Some(STORAGE_CLASS.to_string()),
            phase: Some("Bound".to_string()),
        }
    }

    /// Opt in with the given ceiling
    pub fn autoscaled(self, max_capacity: &str) -> Self {
        self.with_annotation(IS_ENABLED, "true")
            .with_annotation(MAX_CAPACITY, max_capacity)
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// Requested and provisioned size
    pub fn size(mut self, size: &str) -> Self {
        self.requested = Some(size.to_string());
        self.capacity = Some(size.to_string());
        self
    }

    pub fn requested(mut self, size: &str) -> Self {
        self.requested = Some(size.to_string());
        self
    }

    pub fn capacity(mut self, size: &str) -> Self {
        self.capacity = Some(size.to_string());
        self
    }

    pub fn storage_class(mut self, class: Option<&str>) -> Self {
        self.storage_class = class.map(str::to_string);
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn build(self) -> PersistentVolumeClaim {
        let storage = |size: Option<String>| {
            size.map(|s| BTreeMap::from([("storage".to_string(), Quantity(s))]))
        };

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                annotations: (!self.annotations.is_empty()).then_some(self.annotations),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: self.storage_class,
                resources: Some(VolumeResourceRequirements {
                    requests: storage(self.requested),
                    limits: None,
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                phase: self.phase,
                capacity: storage(self.capacity),
                ..Default::default()
            }),
        }
    }
}

// =============================================================================
// StorageClasses and Secrets
// =============================================================================

pub fn storage_class(name: &str, allow_expansion: bool, is_default: bool) -> StorageClass {
    let annotations = is_default.then(|| {
        BTreeMap::from([(
            "storageclass.kubernetes.io/is-default-class".to_string(),
            "true".to_string(),
        )])
    });
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations,
            ..Default::default()
        },
        provisioner: "kubernetes.io/no-provisioner".to_string(),
        allow_volume_expansion: Some(allow_expansion),
        ..Default::default()
    }
}

/// CA secret carrying a bundle
pub fn ca_secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CA_BUNDLE_KEY.to_string(),
            ByteString(b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".to_vec()),
        )])),
        ..Default::default()
    }
}

// =============================================================================
// ApiServerAutoscalers
// =============================================================================

/// Builder for ApiServerAutoscaler resources
pub struct ApiServerAutoscalerBuilder {
    autoscaler: ApiServerAutoscaler,
}

impl ApiServerAutoscalerBuilder {
    /// Enabled autoscaler for `deployment` with 1..4 replicas
    pub fn new(deployment: &str, namespace: &str) -> Self {
        let mut autoscaler = ApiServerAutoscaler::new(
            deployment,
            ApiServerAutoscalerSpec {
                enabled: true,
                deployment_name: deployment.to_string(),
                container_name: "kube-apiserver".to_string(),
                min_replicas: 1,
                max_replicas: 4,
                tuning: None,
            },
        );
        autoscaler.metadata.namespace = Some(namespace.to_string());
        autoscaler.metadata.uid = Some("test-uid-12345".to_string());
        autoscaler.metadata.generation = Some(1);
        Self { autoscaler }
    }

    pub fn with_replicas(mut self, min: i32, max: i32) -> Self {
        self.autoscaler.spec.min_replicas = min;
        self.autoscaler.spec.max_replicas = max;
        self
    }

    pub fn with_deployment(mut self, deployment: &str) -> Self {
        self.autoscaler.spec.deployment_name = deployment.to_string();
        self
    }

    pub fn with_tuning(mut self, tuning: TuningOverrides) -> Self {
        self.autoscaler.spec.tuning = Some(tuning);
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.autoscaler.metadata.generation = Some(generation);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.autoscaler.spec.enabled = false;
        self
    }

    pub fn with_finalizer(mut self) -> Self {
        self.autoscaler.metadata.finalizers =
            Some(vec![gardener_scaling::FINALIZER.to_string()]);
        self
    }

    pub fn deleting(mut self) -> Self {
        self.autoscaler.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        self
    }

    pub fn with_status(mut self, status: ApiServerAutoscalerStatus) -> Self {
        self.autoscaler.status = Some(status);
        self
    }

    pub fn build(self) -> ApiServerAutoscaler {
        self.autoscaler
    }
}
