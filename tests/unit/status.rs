//! Unit tests for status management

use gardener_scaling::controller::status::{
    ConditionBuilder, condition_status, condition_types, retry_count, spec_changed,
};
use gardener_scaling::crd::{ApiServerAutoscalerStatus, AutoscalerPhase};

use crate::common::*;

mod condition_builder_tests {
    use super::*;

    #[test]
    fn test_new_builder_is_empty() {
        assert!(ConditionBuilder::new(Some(1)).build().is_empty());
    }

    #[test]
    fn test_status_flip_updates_transition() {
        let conditions = ConditionBuilder::new(Some(1))
            .degraded(false, "Healthy", "ok")
            .build();
        let mut stale = conditions.clone();
        stale[0].last_transition_time = "2020-01-01T00:00:00+00:00".to_string();

        let flipped = ConditionBuilder::from_existing(stale, Some(2))
            .degraded(true, "ReconciliationFailed", "boom")
            .build();

        assert_eq!(flipped[0].type_, condition_types::DEGRADED);
        assert_eq!(flipped[0].status, condition_status::TRUE);
        assert_eq!(flipped[0].reason, "ReconciliationFailed");
        assert_ne!(flipped[0].last_transition_time, "2020-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_same_status_keeps_transition() {
        let mut existing = ConditionBuilder::new(Some(1))
            .ready(true, "PoliciesApplied", "ok")
            .build();
        existing[0].last_transition_time = "2020-01-01T00:00:00+00:00".to_string();

        let updated = ConditionBuilder::from_existing(existing, Some(2))
            .ready(true, "PoliciesApplied", "ok again")
            .build();

        assert_eq!(updated[0].last_transition_time, "2020-01-01T00:00:00+00:00");
        assert_eq!(updated[0].observed_generation, Some(2));
    }
}

mod spec_changed_tests {
    use super::*;

    #[test]
    fn test_never_observed() {
        let autoscaler = ApiServerAutoscalerBuilder::new("kube-apiserver", NAMESPACE).build();
        assert!(spec_changed(&autoscaler));
    }

    #[test]
    fn test_observed_current_generation() {
        let autoscaler = ApiServerAutoscalerBuilder::new("kube-apiserver", NAMESPACE)
            .with_generation(4)
            .with_status(ApiServerAutoscalerStatus {
                phase: AutoscalerPhase::Enabled,
                observed_generation: Some(4),
                ..Default::default()
            })
            .build();
        assert!(!spec_changed(&autoscaler));
    }

    #[test]
    fn test_observed_older_generation() {
        let autoscaler = ApiServerAutoscalerBuilder::new("kube-apiserver", NAMESPACE)
            .with_generation(5)
            .with_status(ApiServerAutoscalerStatus {
                observed_generation: Some(4),
                ..Default::default()
            })
            .build();
        assert!(spec_changed(&autoscaler));
    }
}

#[test]
fn test_retry_count_defaults_to_zero() {
    let autoscaler = ApiServerAutoscalerBuilder::new("kube-apiserver", NAMESPACE).build();
    assert_eq!(retry_count(&autoscaler), 0);

    let failing = ApiServerAutoscalerBuilder::new("kube-apiserver", NAMESPACE)
        .with_status(ApiServerAutoscalerStatus {
            retry_count: Some(2),
            ..Default::default()
        })
        .build();
    assert_eq!(retry_count(&failing), 2);
}
