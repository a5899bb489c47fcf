//! Composite HPA + VPA autoscaling for API server deployments
//!
//! The HPA scales out on a per-pod request rate with a large safety margin.
//! The VPA then right-sizes the replicas on CPU and memory within a floor and
//! a ceiling, touching requests only. Both objects are derived together from
//! one set of parameters so they cannot drift apart.

pub mod handle;
pub mod policy;

pub use handle::{CustomMetricsHpa, ReconcileOutcome};
pub use policy::{CoordinatorState, DesiredStateParameters, ResourceBounds, ResourcePolicy, ScalingPolicy};
