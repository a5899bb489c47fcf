//! Operator configuration
//!
//! Parsed once at start from command-line flags with environment fallbacks,
//! then shared by reference with the volume autoscaler and the coordinator.

use std::time::Duration;

use clap::{Args, Parser};

use crate::controller::error::{Error, Result};
use crate::quantity::{parse_bytes, parse_quantity, parse_ratio};

/// Control-plane scaling operator
#[derive(Parser, Clone, Debug)]
#[command(name = "gardener-scaling", version, about = "PVC autoscaler and API server HPA/VPA coordinator")]
pub struct OperatorConfig {
    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Restrict the coordinator controller to one namespace (all namespaces if unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Disable the PVC autoscaler loop
    #[arg(long, env = "DISABLE_VOLUME_AUTOSCALER")]
    pub disable_volume_autoscaler: bool,

    /// Disable the ApiServerAutoscaler controller
    #[arg(long, env = "DISABLE_COORDINATOR")]
    pub disable_coordinator: bool,

    #[command(flatten)]
    pub volume: VolumeConfig,

    #[command(flatten)]
    pub tuning: CoordinatorTuning,

    #[command(flatten)]
    pub leader_election: LeaderElectionConfig,
}

/// Settings of the PVC autoscaler scan loop
#[derive(Args, Clone, Debug)]
pub struct VolumeConfig {
    /// Time between two scan passes
    #[arg(long = "interval", env = "PVC_SCAN_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub scan_interval: Duration,

    /// Base URL of the Prometheus-compatible query API
    #[arg(
        long = "prometheus-address",
        env = "PROMETHEUS_ADDRESS",
        default_value = "http://prometheus-web:80"
    )]
    pub prometheus_address: String,

    /// Timeout of a single metrics query
    #[arg(long, env = "METRICS_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub metrics_timeout: Duration,

    /// Threshold used when a claim does not carry its own
    #[arg(long, env = "PVC_DEFAULT_THRESHOLD", default_value = "80%", value_parser = parse_threshold)]
    pub default_threshold: f64,

    /// Growth policy used when a claim does not carry its own ("25%" or "5Gi")
    #[arg(long, env = "PVC_DEFAULT_INCREASE_BY", default_value = "25%")]
    pub default_increase_by: String,

    /// Only scan claims of this namespace
    #[arg(long = "pvc-namespace", env = "PVC_NAMESPACE")]
    pub namespace: Option<String>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            prometheus_address: "http://prometheus-web:80".to_string(),
            metrics_timeout: Duration::from_secs(30),
            default_threshold: 0.8,
            default_increase_by: "25%".to_string(),
            namespace: None,
        }
    }
}

/// Coordination constants of the HPA/VPA pair
#[derive(Args, Clone, Debug, PartialEq)]
pub struct CoordinatorTuning {
    /// Custom metric the horizontal autoscaler scales on
    #[arg(long, env = "HPA_METRIC_NAME", default_value = "shoot:apiserver_request_total:sum")]
    pub metric_name: String,

    /// Per-pod average of the metric at which scale-out starts
    #[arg(long, env = "HPA_TARGET_AVERAGE_VALUE", default_value = "300")]
    pub target_average_value: String,

    /// Scale-down stabilization window of the horizontal autoscaler
    #[arg(long, env = "HPA_SCALE_DOWN_STABILIZATION", default_value = "15m", value_parser = humantime::parse_duration)]
    pub scale_down_stabilization: Duration,

    /// VPA floor for CPU
    #[arg(long, env = "VPA_MIN_ALLOWED_CPU")]
    pub min_allowed_cpu: Option<String>,

    /// VPA floor for memory
    #[arg(long, env = "VPA_MIN_ALLOWED_MEMORY", default_value = "400M")]
    pub min_allowed_memory: Option<String>,

    /// VPA ceiling for CPU
    #[arg(long, env = "VPA_MAX_ALLOWED_CPU", default_value = "8")]
    pub max_allowed_cpu: Option<String>,

    /// VPA ceiling for memory
    #[arg(long, env = "VPA_MAX_ALLOWED_MEMORY", default_value = "25G")]
    pub max_allowed_memory: Option<String>,

    /// Secret holding the CA bundle the access secret depends on
    #[arg(long, env = "CA_SECRET_NAME", default_value = "ca")]
    pub ca_secret_name: String,

    /// Upper bound for waiting on teardown to finish
    #[arg(long, env = "WAIT_TIMEOUT", default_value = "2m", value_parser = humantime::parse_duration)]
    pub wait_timeout: Duration,
}

impl Default for CoordinatorTuning {
    fn default() -> Self {
        Self {
            metric_name: "shoot:apiserver_request_total:sum".to_string(),
            target_average_value: "300".to_string(),
            scale_down_stabilization: Duration::from_secs(900),
            min_allowed_cpu: None,
            min_allowed_memory: Some("400M".to_string()),
            max_allowed_cpu: Some("8".to_string()),
            max_allowed_memory: Some("25G".to_string()),
            ca_secret_name: "ca".to_string(),
            wait_timeout: Duration::from_secs(120),
        }
    }
}

/// Lease-based leader election settings
#[derive(Args, Clone, Debug)]
pub struct LeaderElectionConfig {
    /// Run without leader election (single replica deployments)
    #[arg(long, env = "DISABLE_LEADER_ELECTION")]
    pub disable_leader_election: bool,

    /// Name of the coordination Lease
    #[arg(long, env = "LEASE_NAME", default_value = "gardener-scaling-leader")]
    pub lease_name: String,

    /// Lease time-to-live
    #[arg(long, env = "LEASE_TTL", default_value = "15s", value_parser = humantime::parse_duration)]
    pub lease_ttl: Duration,
}

impl OperatorConfig {
    /// Cross-field checks clap cannot express
    pub fn validate(&self) -> Result<()> {
        parse_bytes_or_percent(&self.volume.default_increase_by)?;
        parse_quantity(&self.tuning.target_average_value).map_err(|_| {
            Error::InvalidConfig(format!(
                "target average value '{}' is not a quantity",
                self.tuning.target_average_value
            ))
        })?;
        for bound in [
            &self.tuning.min_allowed_cpu,
            &self.tuning.min_allowed_memory,
            &self.tuning.max_allowed_cpu,
            &self.tuning.max_allowed_memory,
        ]
        .into_iter()
        .flatten()
        {
            parse_quantity(bound)
                .map_err(|_| Error::InvalidConfig(format!("VPA bound '{}' is not a quantity", bound)))?;
        }
        if !self.volume.prometheus_address.starts_with("http://")
            && !self.volume.prometheus_address.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "prometheus address must be an http(s) URL, got '{}'",
                self.volume.prometheus_address
            )));
        }
        Ok(())
    }
}

fn parse_threshold(input: &str) -> std::result::Result<f64, String> {
    let ratio = parse_ratio(input).map_err(|e| e.to_string())?;
    if ratio <= 0.0 || ratio > 1.0 {
        return Err(format!("threshold must be in (0, 1], got '{}'", input));
    }
    Ok(ratio)
}

/// Growth amount given either as percentage or absolute quantity
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Increment {
    Percent(f64),
    Bytes(u64),
}

pub fn parse_bytes_or_percent(input: &str) -> Result<Increment> {
    let s = input.trim();
    if let Some(pct) = s.strip_suffix('%') {
        let value: f64 = pct
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid increase '{}'", input)))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "increase percentage must be positive, got '{}'",
                input
            )));
        }
        return Ok(Increment::Percent(value));
    }

    match parse_bytes(s) {
        Ok(0) => Err(Error::InvalidConfig(format!(
            "increase step must be positive, got '{}'",
            input
        ))),
        Ok(bytes) => Ok(Increment::Bytes(bytes)),
        Err(_) => Err(Error::InvalidConfig(format!("invalid increase '{}'", input))),
    }
}
