//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the operator ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Labels for coordinator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ReconcileLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-claim volume metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct VolumeLabels {
    pub namespace: String,
    pub persistentvolumeclaim: String,
}

impl VolumeLabels {
    pub fn new(namespace: &str, claim: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            persistentvolumeclaim: claim.to_string(),
        }
    }
}

impl prometheus_client::encoding::EncodeLabelSet for VolumeLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("persistentvolumeclaim", self.persistentvolumeclaim.as_str())
            .encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for skipped volumes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SkipLabels {
    pub namespace: String,
    pub persistentvolumeclaim: String,
    pub reason: String,
}

impl prometheus_client::encoding::EncodeLabelSet for SkipLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("persistentvolumeclaim", self.persistentvolumeclaim.as_str())
            .encode(encoder.encode_label())?;
        ("reason", self.reason.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Total coordinator reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed coordinator reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Coordinator reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,

    // Volume autoscaler
    pub volume_resized_total: Family<VolumeLabels, Counter>,
    pub volume_threshold_reached_total: Family<VolumeLabels, Counter>,
    pub volume_max_capacity_reached_total: Family<VolumeLabels, Counter>,
    pub volume_skipped_total: Family<SkipLabels, Counter>,
    pub volume_errors_total: Family<VolumeLabels, Counter>,
    /// Failed scan passes (metrics source or list failures)
    pub scan_errors_total: Counter,
    pub scan_duration_seconds: Histogram,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "apiserver_autoscaler_reconciliations",
            "Total number of ApiServerAutoscaler reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "apiserver_autoscaler_reconciliation_errors",
            "Total number of ApiServerAutoscaler reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "apiserver_autoscaler_reconcile_duration_seconds",
            "Duration of ApiServerAutoscaler reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let volume_resized_total = Family::<VolumeLabels, Counter>::default();
        registry.register(
            "pvc_autoscaler_resized",
            "Number of capacity increases requested per claim",
            volume_resized_total.clone(),
        );

        let volume_threshold_reached_total = Family::<VolumeLabels, Counter>::default();
        registry.register(
            "pvc_autoscaler_threshold_reached",
            "Number of scans in which a claim crossed its utilization threshold",
            volume_threshold_reached_total.clone(),
        );

        let volume_max_capacity_reached_total = Family::<VolumeLabels, Counter>::default();
        registry.register(
            "pvc_autoscaler_max_capacity_reached",
            "Number of scans in which a triggered claim was already at its max capacity",
            volume_max_capacity_reached_total.clone(),
        );

        let volume_skipped_total = Family::<SkipLabels, Counter>::default();
        registry.register(
            "pvc_autoscaler_skipped",
            "Number of scans in which a claim was left alone",
            volume_skipped_total.clone(),
        );

        let volume_errors_total = Family::<VolumeLabels, Counter>::default();
        registry.register(
            "pvc_autoscaler_errors",
            "Number of failed evaluations or resize requests per claim",
            volume_errors_total.clone(),
        );

        let scan_errors_total = Counter::default();
        registry.register(
            "pvc_autoscaler_scan_errors",
            "Number of scan passes that failed as a whole",
            scan_errors_total.clone(),
        );

        let scan_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "pvc_autoscaler_scan_duration_seconds",
            "Duration of a full scan pass in seconds",
            scan_duration_seconds.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            volume_resized_total,
            volume_threshold_reached_total,
            volume_max_capacity_reached_total,
            volume_skipped_total,
            volume_errors_total,
            scan_errors_total,
            scan_duration_seconds,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    pub fn record_resized(&self, namespace: &str, claim: &str) {
        self.volume_resized_total
            .get_or_create(&VolumeLabels::new(namespace, claim))
            .inc();
    }

    pub fn record_threshold_reached(&self, namespace: &str, claim: &str) {
        self.volume_threshold_reached_total
            .get_or_create(&VolumeLabels::new(namespace, claim))
            .inc();
    }

    pub fn record_max_capacity_reached(&self, namespace: &str, claim: &str) {
        self.volume_max_capacity_reached_total
            .get_or_create(&VolumeLabels::new(namespace, claim))
            .inc();
    }

    pub fn record_skipped(&self, namespace: &str, claim: &str, reason: &str) {
        let labels = SkipLabels {
            namespace: namespace.to_string(),
            persistentvolumeclaim: claim.to_string(),
            reason: reason.to_string(),
        };
        self.volume_skipped_total.get_or_create(&labels).inc();
    }

    pub fn record_volume_error(&self, namespace: &str, claim: &str) {
        self.volume_errors_total
            .get_or_create(&VolumeLabels::new(namespace, claim))
            .inc();
    }

    /// Record a finished scan pass
    pub fn record_scan(&self, duration_secs: f64, failed: bool) {
        self.scan_duration_seconds.observe(duration_secs);
        if failed {
            self.scan_errors_total.inc();
        }
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails (should never happen with valid metrics).
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (connected to K8s API)
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile or scan, seconds since the Unix epoch
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Remember that a pass just completed
    pub fn touch(&self) {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
