//! Per-claim autoscaling policy read from PVC annotations

use std::collections::BTreeMap;

use crate::config::{Increment, VolumeConfig, parse_bytes_or_percent};
use crate::controller::error::{Error, Result};
use crate::quantity::{GIB, parse_bytes, parse_ratio, round_up};

pub const IS_ENABLED: &str = "pvc.autoscaling.gardener.cloud/is-enabled";
pub const THRESHOLD: &str = "pvc.autoscaling.gardener.cloud/threshold";
pub const INODE_THRESHOLD: &str = "pvc.autoscaling.gardener.cloud/inode-threshold";
pub const INCREASE_BY: &str = "pvc.autoscaling.gardener.cloud/increase-by";
pub const MAX_CAPACITY: &str = "pvc.autoscaling.gardener.cloud/max-capacity";

/// How much a triggered volume grows before clamping to its ceiling
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GrowthPolicy {
    /// Grow by a percentage of the current capacity, rounded up to a whole GiB
    IncreaseBy { percent: f64 },
    /// Grow by a fixed number of bytes
    FixedStep { bytes: u64 },
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        GrowthPolicy::IncreaseBy { percent: 25.0 }
    }
}

impl From<Increment> for GrowthPolicy {
    fn from(increment: Increment) -> Self {
        match increment {
            Increment::Percent(percent) => GrowthPolicy::IncreaseBy { percent },
            Increment::Bytes(bytes) => GrowthPolicy::FixedStep { bytes },
        }
    }
}

impl GrowthPolicy {
    /// Unclamped next capacity for a volume of `current` bytes
    pub fn candidate(&self, current: u64) -> u64 {
        match *self {
            GrowthPolicy::IncreaseBy { percent } => {
                let grown = (current as f64 * (1.0 + percent / 100.0)).ceil();
                let grown = if grown >= u64::MAX as f64 {
                    u64::MAX
                } else {
                    grown as u64
                };
                // Always make progress, even for tiny volumes and percentages
                round_up(grown.max(current.saturating_add(1)), GIB)
            }
            GrowthPolicy::FixedStep { bytes } => current.saturating_add(bytes.max(1)),
        }
    }
}

/// Effective policy of one claim
#[derive(Clone, Debug, PartialEq)]
pub struct VolumePolicy {
    /// Used fraction of bytes at which the claim grows, `0 < threshold <= 1`
    pub threshold: f64,
    /// Used fraction of inodes at which the claim grows; inodes are ignored if unset
    pub inode_threshold: Option<f64>,
    pub growth: GrowthPolicy,
    pub max_capacity_bytes: u64,
}

/// Operator-wide fallbacks for claims that do not set their own policy
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeDefaults {
    pub threshold: f64,
    pub growth: GrowthPolicy,
}

impl Default for VolumeDefaults {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            growth: GrowthPolicy::default(),
        }
    }
}

impl VolumeDefaults {
    pub fn from_config(config: &VolumeConfig) -> Result<Self> {
        Ok(Self {
            threshold: config.default_threshold,
            growth: parse_bytes_or_percent(&config.default_increase_by)?.into(),
        })
    }
}

/// Whether the claim opted into autoscaling
pub fn is_enabled(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(IS_ENABLED)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Build the claim's policy from its annotations
///
/// `max-capacity` is mandatory. Malformed values are reported as
/// [`Error::InvalidConfig`] naming the offending annotation.
pub fn parse_policy(
    annotations: &BTreeMap<String, String>,
    defaults: &VolumeDefaults,
) -> Result<VolumePolicy> {
    let threshold = match annotations.get(THRESHOLD) {
        Some(raw) => parse_fraction(THRESHOLD, raw)?,
        None => defaults.threshold,
    };

    let inode_threshold = annotations
        .get(INODE_THRESHOLD)
        .map(|raw| parse_fraction(INODE_THRESHOLD, raw))
        .transpose()?;

    let growth = match annotations.get(INCREASE_BY) {
        Some(raw) => parse_bytes_or_percent(raw)
            .map_err(|e| Error::InvalidConfig(format!("annotation {}: {}", INCREASE_BY, e)))?
            .into(),
        None => defaults.growth,
    };

    let raw_max = annotations
        .get(MAX_CAPACITY)
        .ok_or_else(|| Error::InvalidConfig(format!("annotation {} is required", MAX_CAPACITY)))?;
    let max_capacity_bytes = parse_bytes(raw_max).map_err(|_| {
        Error::InvalidConfig(format!(
            "annotation {}: '{}' is not a quantity",
            MAX_CAPACITY, raw_max
        ))
    })?;

    Ok(VolumePolicy {
        threshold,
        inode_threshold,
        growth,
        max_capacity_bytes,
    })
}

fn parse_fraction(annotation: &str, raw: &str) -> Result<f64> {
    let value = parse_ratio(raw)
        .map_err(|_| Error::InvalidConfig(format!("annotation {}: '{}' is not a ratio", annotation, raw)))?;
    if value <= 0.0 || value > 1.0 {
        return Err(Error::InvalidConfig(format!(
            "annotation {}: '{}' must be in (0, 1]",
            annotation, raw
        )));
    }
    Ok(value)
}
