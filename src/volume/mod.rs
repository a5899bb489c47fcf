//! PVC autoscaler
//!
//! Grows individually annotated persistent volume claims once their byte or
//! inode utilization crosses a threshold, never beyond a per-claim ceiling.

pub mod annotations;
pub mod decision;
pub mod engine;
pub mod prometheus;
pub mod storage_class;

pub use annotations::{GrowthPolicy, VolumeDefaults, VolumePolicy};
pub use decision::{Decision, ScalableVolume, SkipReason, evaluate};
pub use engine::{Outcome, ScanReport, VolumeAutoscaler};
pub use prometheus::{MetricsSource, PrometheusMetricsSource, UsageByClaim, VolumeUsage};
