use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ApiServerAutoscaler declares a coordinated HPA + VPA pair for an API server Deployment
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "autoscaling.gardener.cloud",
    version = "v1alpha1",
    kind = "ApiServerAutoscaler",
    plural = "apiserverautoscalers",
    shortname = "asa",
    namespaced,
    status = "ApiServerAutoscalerStatus",
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.deploymentName"}"#,
    printcolumn = r#"{"name":"Min", "type":"integer", "jsonPath":".spec.minReplicas"}"#,
    printcolumn = r#"{"name":"Max", "type":"integer", "jsonPath":".spec.maxReplicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerAutoscalerSpec {
    /// When false, every policy object of this autoscaler is removed from the server
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Name of the API server Deployment in the same namespace
    pub deployment_name: String,

    /// Name of the API server container inside the pod
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Lower bound of the horizontal scaling range (also the VPA eviction floor)
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,

    /// Upper bound of the horizontal scaling range
    pub max_replicas: i32,

    /// Per-object overrides of the operator-wide coordination tuning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning: Option<TuningOverrides>,
}

fn default_enabled() -> bool {
    true
}

fn default_container_name() -> String {
    "kube-apiserver".to_string()
}

fn default_min_replicas() -> i32 {
    1
}

/// Overrides for the coordination constants of a single autoscaler
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TuningOverrides {
    /// Per-pod average of the request-rate metric at which HPA scales out (e.g. "300")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_average_value: Option<String>,

    /// Delay applied to scale-down recommendations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_stabilization_seconds: Option<i32>,

    /// VPA floor for the API server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allowed: Option<ResourceList>,

    /// VPA ceiling for the API server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<ResourceList>,
}

/// Resource quantities for CPU and memory
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ResourceList {
    /// CPU quantity (e.g., "300m", "8")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g., "400M", "25G")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Status of an ApiServerAutoscaler
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerAutoscalerStatus {
    /// Current phase
    #[serde(default)]
    pub phase: AutoscalerPhase,

    /// Deployment the managed objects currently target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    /// Name of the managed HorizontalPodAutoscaler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa_name: Option<String>,

    /// Name of the managed VerticalPodAutoscaler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpa_name: Option<String>,

    /// Observed generation of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last reconciliation error, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Consecutive failed reconciliations, drives the retry backoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    /// Time of the last status change (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<String>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Lifecycle phase of an ApiServerAutoscaler
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum AutoscalerPhase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// HPA and VPA are present and reflect the spec
    Enabled,
    /// No policy objects are present on the server
    Disabled,
    /// The last reconciliation failed
    Failed,
    /// Teardown in progress
    Deleting,
}

impl std::fmt::Display for AutoscalerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutoscalerPhase::Pending => write!(f, "Pending"),
            AutoscalerPhase::Enabled => write!(f, "Enabled"),
            AutoscalerPhase::Disabled => write!(f, "Disabled"),
            AutoscalerPhase::Failed => write!(f, "Failed"),
            AutoscalerPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
