//! Validation of autoscaling policies
//!
//! Every check here runs before anything is written to the server, so an
//! invalid desired state never leaves a half-applied policy pair behind.

use crate::controller::error::{Error, Result};
use crate::coordinator::policy::{ResourcePolicy, ScalingPolicy};
use crate::crd::ApiServerAutoscaler;
use crate::quantity::parse_quantity;

/// Minimum number of replicas
pub const MIN_REPLICAS: i32 = 1;

/// Maximum number of replicas (arbitrary limit for safety)
pub const MAX_REPLICAS: i32 = 100;

/// Validate the autoscaler spec
pub fn validate_spec(autoscaler: &ApiServerAutoscaler) -> Result<()> {
    let spec = &autoscaler.spec;

    if spec.deployment_name.is_empty() {
        return Err(Error::ValidationError(
            "deploymentName must not be empty".to_string(),
        ));
    }
    if spec.container_name.is_empty() {
        return Err(Error::ValidationError(
            "containerName must not be empty".to_string(),
        ));
    }
    validate_replicas(spec.min_replicas, spec.max_replicas)
}

/// Validate a replica range
pub fn validate_replicas(min_replicas: i32, max_replicas: i32) -> Result<()> {
    if min_replicas < MIN_REPLICAS {
        return Err(Error::ValidationError(format!(
            "minReplicas {} is below minimum {}",
            min_replicas, MIN_REPLICAS
        )));
    }

    if max_replicas > MAX_REPLICAS {
        return Err(Error::ValidationError(format!(
            "maxReplicas {} exceeds maximum {}",
            max_replicas, MAX_REPLICAS
        )));
    }

    if min_replicas > max_replicas {
        return Err(Error::InvariantViolation(format!(
            "minReplicas {} is greater than maxReplicas {}",
            min_replicas, max_replicas
        )));
    }

    Ok(())
}

/// Validate the horizontal policy
pub fn validate_scaling_policy(policy: &ScalingPolicy) -> Result<()> {
    validate_replicas(policy.min_replicas, policy.max_replicas)?;

    if policy.scale_down_stabilization_seconds < 0 {
        return Err(Error::InvariantViolation(format!(
            "scale-down stabilization window must not be negative, got {}s",
            policy.scale_down_stabilization_seconds
        )));
    }

    if policy.metric_name.is_empty() {
        return Err(Error::ValidationError("metric name must not be empty".to_string()));
    }

    let target = quantity("target average value", &policy.target_average_value)?;
    if target <= 0.0 {
        return Err(Error::ValidationError(format!(
            "target average value must be positive, got {}",
            policy.target_average_value
        )));
    }

    Ok(())
}

/// Validate the vertical policy
pub fn validate_resource_policy(policy: &ResourcePolicy) -> Result<()> {
    if policy.container_name.is_empty() {
        return Err(Error::ValidationError(
            "container name must not be empty".to_string(),
        ));
    }
    if policy.min_replicas < MIN_REPLICAS {
        return Err(Error::ValidationError(format!(
            "VPA minReplicas {} is below minimum {}",
            policy.min_replicas, MIN_REPLICAS
        )));
    }

    validate_bounds("cpu", policy.min_allowed.cpu.as_deref(), policy.max_allowed.cpu.as_deref())?;
    validate_bounds(
        "memory",
        policy.min_allowed.memory.as_deref(),
        policy.max_allowed.memory.as_deref(),
    )?;
    Ok(())
}

fn validate_bounds(resource: &str, min: Option<&str>, max: Option<&str>) -> Result<()> {
    let min_value = min.map(|m| quantity(resource, m)).transpose()?;
    let max_value = max.map(|m| quantity(resource, m)).transpose()?;

    if let (Some(min_value), Some(max_value)) = (min_value, max_value) {
        if min_value > max_value {
            return Err(Error::InvariantViolation(format!(
                "{} minAllowed {} is greater than maxAllowed {}",
                resource,
                min.unwrap_or_default(),
                max.unwrap_or_default()
            )));
        }
    }
    Ok(())
}

fn quantity(what: &str, value: &str) -> Result<f64> {
    parse_quantity(value)
        .map_err(|_| Error::ValidationError(format!("{} '{}' is not a valid quantity", what, value)))
}
