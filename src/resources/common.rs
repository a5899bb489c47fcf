//! Common utilities for Kubernetes resource generation
//!
//! Shared constants and helpers used by the HPA, VPA and access secret
//! generators so that every object carries consistent metadata.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::ApiServerAutoscaler;

/// API version for ApiServerAutoscaler CRD
pub const API_VERSION: &str = "autoscaling.gardener.cloud/v1alpha1";

/// Kind for ApiServerAutoscaler CRD
pub const KIND: &str = "ApiServerAutoscaler";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "gardener-scaling";

/// Label holding the role of an object within the control plane
pub const LABEL_ROLE: &str = "role";

/// Role label value prefix of the API server
pub const ROLE_APISERVER: &str = "apiserver";

/// Label pointing at the workload a policy object belongs to
pub const LABEL_TARGET: &str = "autoscaling.gardener.cloud/target";

/// Generate an owner reference for an ApiServerAutoscaler
///
/// Policy objects created on behalf of an ApiServerAutoscaler are garbage
/// collected together with it.
pub fn owner_reference(autoscaler: &ApiServerAutoscaler) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: autoscaler.name_any(),
        uid: autoscaler.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels shared by all objects managed for one target deployment
pub fn standard_labels(deployment_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (LABEL_TARGET.to_string(), deployment_name.to_string()),
    ])
}

/// Standard labels plus `role: apiserver-<suffix>`
pub fn role_labels(deployment_name: &str, suffix: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(deployment_name);
    labels.insert(
        LABEL_ROLE.to_string(),
        format!("{}-{}", ROLE_APISERVER, suffix),
    );
    labels
}
