//! Desired HPA/VPA policy pair for one API server deployment
//!
//! [`CoordinatorState::new`] is the only place the two policies are derived
//! from the desired-state parameters. It couples them: the VPA updater's
//! `minReplicas` is always the HPA's `minReplicas`, so eviction-driven
//! vertical updates never take the workload below the horizontal floor.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::config::CoordinatorTuning;
use crate::controller::error::{Error, Result};
use crate::controller::validation::{validate_resource_policy, validate_scaling_policy};
use crate::crd::{ApiServerAutoscaler, ResourceList, TuningOverrides};
use crate::resources::common::owner_reference;
use crate::resources::vpa::{
    ContainerResourcePolicy, ContainerScalingMode, ControlledValues, PodResourcePolicy,
    TargetRef, UpdateMode, UpdatePolicy, VpaSpec,
};

/// Caller-supplied desired state of a coordinated workload
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredStateParameters {
    /// `false` tears the policy pair down
    pub enabled: bool,
    /// API server container inside the pod
    pub container_name: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
    /// Per-workload overrides of the operator-wide tuning
    pub overrides: TuningOverrides,
    /// Owner set on every created object
    pub owner: Option<OwnerReference>,
}

impl DesiredStateParameters {
    pub fn new(container_name: impl Into<String>, min_replicas: i32, max_replicas: i32) -> Self {
        Self {
            enabled: true,
            container_name: container_name.into(),
            min_replicas,
            max_replicas,
            overrides: TuningOverrides::default(),
            owner: None,
        }
    }

    /// Parameters requesting teardown
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new("", 1, 1)
        }
    }

    pub fn from_autoscaler(autoscaler: &ApiServerAutoscaler) -> Self {
        let spec = &autoscaler.spec;
        Self {
            enabled: spec.enabled,
            container_name: spec.container_name.clone(),
            min_replicas: spec.min_replicas,
            max_replicas: spec.max_replicas,
            overrides: spec.tuning.clone().unwrap_or_default(),
            owner: autoscaler.uid().map(|_| owner_reference(autoscaler)),
        }
    }
}

/// Horizontal policy
#[derive(Clone, Debug, PartialEq)]
pub struct ScalingPolicy {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub metric_name: String,
    /// Per-pod average of the metric the HPA aims for
    pub target_average_value: String,
    pub scale_down_stabilization_seconds: i32,
}

/// CPU and memory quantities; unset dimensions are unbounded
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceBounds {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl ResourceBounds {
    /// Overlay `overrides` on top of these bounds, per dimension
    fn with_overrides(self, overrides: Option<&ResourceList>) -> Self {
        match overrides {
            Some(o) => Self {
                cpu: o.cpu.clone().or(self.cpu),
                memory: o.memory.clone().or(self.memory),
            },
            None => self,
        }
    }

    fn to_map(&self) -> BTreeMap<String, String> {
        [("cpu", &self.cpu), ("memory", &self.memory)]
            .into_iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.to_string(), v)))
            .collect()
    }
}

/// Vertical policy
#[derive(Clone, Debug, PartialEq)]
pub struct ResourcePolicy {
    pub container_name: String,
    pub min_allowed: ResourceBounds,
    pub max_allowed: ResourceBounds,
    pub update_mode: UpdateMode,
    pub controlled_values: ControlledValues,
    /// Updater eviction floor
    pub min_replicas: i32,
}

/// The validated policy pair
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinatorState {
    pub scaling: ScalingPolicy,
    pub resources: ResourcePolicy,
}

impl CoordinatorState {
    /// Derive and validate both policies
    pub fn new(params: &DesiredStateParameters, tuning: &CoordinatorTuning) -> Result<Self> {
        let overrides = &params.overrides;

        let stabilization = match overrides.scale_down_stabilization_seconds {
            Some(secs) => secs,
            None => i32::try_from(tuning.scale_down_stabilization.as_secs()).map_err(|_| {
                Error::InvalidConfig(format!(
                    "scale-down stabilization {:?} is out of range",
                    tuning.scale_down_stabilization
                ))
            })?,
        };

        let scaling = ScalingPolicy {
            min_replicas: params.min_replicas,
            max_replicas: params.max_replicas,
            metric_name: tuning.metric_name.clone(),
            target_average_value: overrides
                .target_average_value
                .clone()
                .unwrap_or_else(|| tuning.target_average_value.clone()),
            scale_down_stabilization_seconds: stabilization,
        };

        let min_allowed = ResourceBounds {
            cpu: tuning.min_allowed_cpu.clone(),
            memory: tuning.min_allowed_memory.clone(),
        }
        .with_overrides(overrides.min_allowed.as_ref());
        let max_allowed = ResourceBounds {
            cpu: tuning.max_allowed_cpu.clone(),
            memory: tuning.max_allowed_memory.clone(),
        }
        .with_overrides(overrides.max_allowed.as_ref());

        let resources = ResourcePolicy {
            container_name: params.container_name.clone(),
            min_allowed,
            max_allowed,
            update_mode: UpdateMode::Auto,
            controlled_values: ControlledValues::RequestsOnly,
            min_replicas: scaling.min_replicas,
        };

        validate_scaling_policy(&scaling)?;
        validate_resource_policy(&resources)?;

        Ok(Self { scaling, resources })
    }

    /// VPA spec targeting `deployment_name`
    pub fn vpa_spec(&self, deployment_name: &str) -> VpaSpec {
        let policy = &self.resources;
        VpaSpec {
            target_ref: TargetRef::deployment(deployment_name),
            update_policy: Some(UpdatePolicy {
                update_mode: policy.update_mode,
                min_replicas: Some(policy.min_replicas),
            }),
            resource_policy: Some(PodResourcePolicy {
                container_policies: vec![ContainerResourcePolicy {
                    container_name: policy.container_name.clone(),
                    mode: Some(ContainerScalingMode::Auto),
                    min_allowed: policy.min_allowed.to_map(),
                    max_allowed: policy.max_allowed.to_map(),
                    controlled_values: Some(policy.controlled_values),
                }],
            }),
            recommenders: Vec::new(),
        }
    }
}
