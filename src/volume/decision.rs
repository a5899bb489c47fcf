//! Threshold evaluation for a single volume
//!
//! [`evaluate`] is a pure function of the observed volume and its policy. It
//! never proposes a capacity at or below the current one, and never one above
//! the configured ceiling.

use std::fmt;

use crate::controller::error::{Error, Result};
use crate::quantity::format_bytes;
use crate::store::ObjectKey;
use crate::volume::annotations::VolumePolicy;

/// Observed state of one persistent volume claim
#[derive(Clone, Debug, PartialEq)]
pub struct ScalableVolume {
    pub key: ObjectKey,
    /// Larger of the requested and the provisioned size
    pub current_capacity_bytes: u64,
    /// Filesystem size reported by the metrics source, if any
    pub observed_capacity_bytes: Option<u64>,
    pub used_bytes: u64,
    pub capacity_inodes: Option<u64>,
    pub used_inodes: Option<u64>,
    pub max_allowed_capacity_bytes: u64,
    pub autoscale_enabled: bool,
    pub expansion_supported: bool,
}

impl ScalableVolume {
    /// Used fraction of bytes, `None` if the capacity is unknown
    pub fn utilization(&self) -> Option<f64> {
        let capacity = self
            .observed_capacity_bytes
            .filter(|c| *c > 0)
            .unwrap_or(self.current_capacity_bytes);
        (capacity > 0).then(|| self.used_bytes as f64 / capacity as f64)
    }

    /// Used fraction of inodes, `None` unless both inode figures are known
    pub fn inode_utilization(&self) -> Option<f64> {
        match (self.used_inodes, self.capacity_inodes) {
            (Some(used), Some(capacity)) if capacity > 0 => Some(used as f64 / capacity as f64),
            _ => None,
        }
    }
}

/// Why a volume was left alone
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ExpansionUnsupported,
    BelowThreshold,
    NotBound,
    NoMetrics,
    ResizeInProgress,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::ExpansionUnsupported => "expansion_unsupported",
            SkipReason::BelowThreshold => "below_threshold",
            SkipReason::NotBound => "not_bound",
            SkipReason::NoMetrics => "no_metrics",
            SkipReason::ResizeInProgress => "resize_in_progress",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    /// Grow the claim to the absolute size `to`
    Resize { from: u64, to: u64 },
    /// Threshold crossed but the ceiling leaves no room
    MaxCapacityReached { capacity: u64, max: u64 },
}

impl Decision {
    /// Whether utilization crossed the threshold
    pub fn threshold_reached(&self) -> bool {
        matches!(
            self,
            Decision::Resize { .. } | Decision::MaxCapacityReached { .. }
        )
    }
}

/// Decide whether and how far `volume` must grow
pub fn evaluate(volume: &ScalableVolume, policy: &VolumePolicy) -> Decision {
    if !volume.autoscale_enabled {
        return Decision::Skip(SkipReason::Disabled);
    }
    if !volume.expansion_supported {
        return Decision::Skip(SkipReason::ExpansionUnsupported);
    }

    let bytes_triggered = volume
        .utilization()
        .is_some_and(|ratio| ratio >= policy.threshold);
    let inodes_triggered = match (volume.inode_utilization(), policy.inode_threshold) {
        (Some(ratio), Some(threshold)) => ratio >= threshold,
        _ => false,
    };
    if !bytes_triggered && !inodes_triggered {
        return Decision::Skip(SkipReason::BelowThreshold);
    }

    let current = volume.current_capacity_bytes;
    let max = volume.max_allowed_capacity_bytes;
    let target = policy.growth.candidate(current).min(max);

    if target <= current {
        return Decision::MaxCapacityReached {
            capacity: current,
            max,
        };
    }

    Decision::Resize {
        from: current,
        to: target,
    }
}

/// Reject any resize that would shrink the volume or exceed its ceiling
pub fn check_resize(volume: &ScalableVolume, target: u64) -> Result<()> {
    if target <= volume.current_capacity_bytes {
        return Err(Error::InvariantViolation(format!(
            "refusing to resize {} from {} to {}: capacity must grow",
            volume.key,
            format_bytes(volume.current_capacity_bytes),
            format_bytes(target)
        )));
    }
    if target > volume.max_allowed_capacity_bytes {
        return Err(Error::InvariantViolation(format!(
            "refusing to resize {} to {}: above max capacity {}",
            volume.key,
            format_bytes(target),
            format_bytes(volume.max_allowed_capacity_bytes)
        )));
    }
    Ok(())
}
