//! HorizontalPodAutoscaler resource generation
//!
//! The HPA scales the API server on a per-pod request-rate metric served by
//! the custom metrics adapter. Scale-down is delayed by a stabilization window,
//! scale-up is not.

use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HPAScalingRules, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerBehavior, HorizontalPodAutoscalerSpec, MetricIdentifier, MetricSpec,
    MetricTarget, PodsMetricSource,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::coordinator::policy::ScalingPolicy;

/// Build the HorizontalPodAutoscaler for `deployment_name`
pub fn generate_hpa(
    metadata: ObjectMeta,
    deployment_name: &str,
    policy: &ScalingPolicy,
) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata,
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: deployment_name.to_string(),
            },
            min_replicas: Some(policy.min_replicas),
            max_replicas: policy.max_replicas,
            metrics: Some(vec![MetricSpec {
                type_: "Pods".to_string(),
                pods: Some(PodsMetricSource {
                    metric: MetricIdentifier {
                        name: policy.metric_name.clone(),
                        selector: None,
                    },
                    target: MetricTarget {
                        type_: "AverageValue".to_string(),
                        average_value: Some(Quantity(policy.target_average_value.clone())),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            behavior: Some(HorizontalPodAutoscalerBehavior {
                scale_down: Some(HPAScalingRules {
                    stabilization_window_seconds: Some(policy.scale_down_stabilization_seconds),
                    ..Default::default()
                }),
                scale_up: Some(HPAScalingRules {
                    stabilization_window_seconds: Some(0),
                    ..Default::default()
                }),
            }),
        }),
        ..Default::default()
    }
}
