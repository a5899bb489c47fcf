// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for the scaling decisions
//!
//! These tests use proptest to generate random volumes and parameters and
//! verify that:
//! 1. A resize never shrinks a volume and never exceeds its ceiling
//! 2. Nothing is resized below the threshold
//! 3. Growth always makes progress
//! 4. The VPA eviction floor always equals the HPA minimum

use proptest::prelude::*;

use gardener_scaling::config::CoordinatorTuning;
use gardener_scaling::coordinator::{CoordinatorState, DesiredStateParameters};
use gardener_scaling::quantity::GIB;
use gardener_scaling::store::{ObjectKey, json_contains, json_equivalent};
use gardener_scaling::volume::annotations::{GrowthPolicy, VolumePolicy};
use gardener_scaling::volume::{Decision, ScalableVolume, SkipReason, evaluate};

fn growth_strategy() -> impl Strategy<Value = GrowthPolicy> {
    prop_oneof![
        (1.0f64..200.0).prop_map(|percent| GrowthPolicy::IncreaseBy { percent }),
        (1u64..64).prop_map(|gib| GrowthPolicy::FixedStep { bytes: gib * GIB }),
    ]
}

prop_compose! {
    fn volume_and_policy()(
        current_gib in 1u64..512,
        headroom_gib in 0u64..512,
        used_permille in 0u64..=1000,
        threshold_pct in 1u32..=100,
        growth in growth_strategy(),
    ) -> (ScalableVolume, VolumePolicy) {
        let current = current_gib * GIB;
        let volume = ScalableVolume {
            key: ObjectKey::namespaced("shoot--dev--a", "data"),
            current_capacity_bytes: current,
            observed_capacity_bytes: Some(current),
            used_bytes: current / 1000 * used_permille,
            capacity_inodes: None,
            used_inodes: None,
            max_allowed_capacity_bytes: current + headroom_gib * GIB,
            autoscale_enabled: true,
            expansion_supported: true,
        };
        let policy = VolumePolicy {
            threshold: f64::from(threshold_pct) / 100.0,
            inode_threshold: None,
            growth,
            max_capacity_bytes: volume.max_allowed_capacity_bytes,
        };
        (volume, policy)
    }
}

proptest! {
    #[test]
    fn resize_stays_within_bounds((volume, policy) in volume_and_policy()) {
        if let Decision::Resize { from, to } = evaluate(&volume, &policy) {
            prop_assert_eq!(from, volume.current_capacity_bytes);
            prop_assert!(to > from);
            prop_assert!(to <= volume.max_allowed_capacity_bytes);
        }
    }

    #[test]
    fn below_threshold_never_resizes((volume, policy) in volume_and_policy()) {
        let utilization = volume.utilization().unwrap();
        let decision = evaluate(&volume, &policy);
        if utilization < policy.threshold {
            prop_assert_eq!(decision, Decision::Skip(SkipReason::BelowThreshold));
        } else {
            prop_assert!(decision.threshold_reached());
        }
    }

    #[test]
    fn at_ceiling_reports_max_capacity((volume, policy) in volume_and_policy()) {
        let mut volume = volume;
        volume.max_allowed_capacity_bytes = volume.current_capacity_bytes;
        volume.used_bytes = volume.current_capacity_bytes;
        let is_max_capacity_reached = matches!(
            evaluate(&volume, &policy),
            Decision::MaxCapacityReached { .. }
        );
        prop_assert!(is_max_capacity_reached);
    }

    #[test]
    fn growth_always_makes_progress(current in 1u64..(1u64 << 50), growth in growth_strategy()) {
        prop_assert!(growth.candidate(current) > current);
    }

    #[test]
    fn growth_is_monotonic(a in 1u64..(1u64 << 45), b in 1u64..(1u64 << 45), growth in growth_strategy()) {
        let (small, large) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(growth.candidate(small) <= growth.candidate(large));
    }

    #[test]
    fn vpa_floor_equals_hpa_floor(min in 1i32..=100, span in 0i32..=50) {
        let max = (min + span).min(100);
        let params = DesiredStateParameters::new("kube-apiserver", min, max);
        let state = CoordinatorState::new(&params, &CoordinatorTuning::default()).unwrap();
        let spec = state.vpa_spec("kube-apiserver");
        prop_assert_eq!(spec.update_policy.unwrap().min_replicas, Some(state.scaling.min_replicas));
        prop_assert_eq!(state.scaling.min_replicas, min);
    }

    #[test]
    fn inverted_replica_range_is_rejected(max in 1i32..=99, extra in 1i32..=10) {
        let params = DesiredStateParameters::new("kube-apiserver", max + extra, max);
        prop_assert!(CoordinatorState::new(&params, &CoordinatorTuning::default()).is_err());
    }

    #[test]
    fn json_contains_is_reflexive(n in any::<i64>(), s in "[a-z]{0,12}", flag in any::<bool>()) {
        let value = serde_json::json!({"spec": {"n": n, "s": s, "flags": [flag, !flag]}});
        prop_assert!(json_contains(&value, &value));
        prop_assert!(json_equivalent(&value, &value));
    }
}
