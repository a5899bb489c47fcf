//! VerticalPodAutoscaler resource generation
//!
//! The VPA API (`autoscaling.k8s.io/v1`) is a CRD shipped with the vertical
//! pod autoscaler, so the object is built as a [`DynamicObject`] from the typed
//! spec below.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::controller::error::Result;

/// VPA API group
pub const VPA_API_GROUP: &str = "autoscaling.k8s.io";
/// VPA API version
pub const VPA_API_VERSION: &str = "v1";
/// VPA kind
pub const VPA_KIND: &str = "VerticalPodAutoscaler";

/// [`ApiResource`] of the VerticalPodAutoscaler CRD
pub fn vpa_resource() -> ApiResource {
    ApiResource {
        group: VPA_API_GROUP.to_string(),
        version: VPA_API_VERSION.to_string(),
        api_version: format!("{}/{}", VPA_API_GROUP, VPA_API_VERSION),
        kind: VPA_KIND.to_string(),
        plural: "verticalpodautoscalers".to_string(),
    }
}

/// VerticalPodAutoscaler spec
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VpaSpec {
    pub target_ref: TargetRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<PodResourcePolicy>,
    /// Always rendered, an empty list keeps the default recommender in charge
    #[serde(default)]
    pub recommenders: Vec<RecommenderSelector>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RecommenderSelector {
    pub name: String,
}

/// Reference to the scaled workload
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl TargetRef {
    pub fn deployment(name: &str) -> Self {
        Self {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    pub update_mode: UpdateMode,
    /// Fewest live replicas required before the updater evicts a pod
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
}

/// How recommendations are applied to pods
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    Off,
    Initial,
    Recreate,
    Auto,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodResourcePolicy {
    pub container_policies: Vec<ContainerResourcePolicy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResourcePolicy {
    pub container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ContainerScalingMode>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub min_allowed: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub max_allowed: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlled_values: Option<ControlledValues>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerScalingMode {
    Auto,
    Off,
}

/// Which resource fields the VPA may change
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlledValues {
    RequestsOnly,
    RequestsAndLimits,
}

/// Build the VerticalPodAutoscaler object
pub fn generate_vpa(metadata: ObjectMeta, spec: &VpaSpec) -> Result<DynamicObject> {
    let name = metadata.name.clone().unwrap_or_default();
    let mut obj = DynamicObject::new(&name, &vpa_resource());
    obj.metadata = metadata;
    obj.data = json!({ "spec": serde_json::to_value(spec)? });
    Ok(obj)
}
