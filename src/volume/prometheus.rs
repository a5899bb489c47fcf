//! Volume usage from a Prometheus-compatible query API
//!
//! The kubelet exports `kubelet_volume_stats_*` series labelled with the
//! claim's `namespace` and `persistentvolumeclaim`. One instant query per
//! series family is issued per scan pass.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::store::ObjectKey;

pub const USED_BYTES: &str = "kubelet_volume_stats_used_bytes";
pub const CAPACITY_BYTES: &str = "kubelet_volume_stats_capacity_bytes";
pub const USED_INODES: &str = "kubelet_volume_stats_inodes_used";
pub const CAPACITY_INODES: &str = "kubelet_volume_stats_inodes";

/// Usage figures of one claim; any of them may be missing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VolumeUsage {
    pub used_bytes: Option<u64>,
    pub capacity_bytes: Option<u64>,
    pub used_inodes: Option<u64>,
    pub capacity_inodes: Option<u64>,
}

pub type UsageByClaim = BTreeMap<ObjectKey, VolumeUsage>;

/// Source of per-claim usage figures
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Usage of every claim the source knows about
    async fn volume_usage(&self) -> Result<UsageByClaim>;
}

pub struct PrometheusMetricsSource {
    client: reqwest::Client,
    base_url: String,
}

impl PrometheusMetricsSource {
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: address.trim_end_matches('/').to_string(),
        })
    }

    async fn query(&self, query: &str) -> Result<Vec<VectorSample>> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        decode_response(query, status, &body)
    }
}

#[async_trait]
impl MetricsSource for PrometheusMetricsSource {
    async fn volume_usage(&self) -> Result<UsageByClaim> {
        let (used, capacity, used_inodes, inodes) = tokio::try_join!(
            self.query(USED_BYTES),
            self.query(CAPACITY_BYTES),
            self.query(USED_INODES),
            self.query(CAPACITY_INODES),
        )?;

        let mut usage = UsageByClaim::new();
        merge(&mut usage, used, |u| &mut u.used_bytes);
        merge(&mut usage, capacity, |u| &mut u.capacity_bytes);
        merge(&mut usage, used_inodes, |u| &mut u.used_inodes);
        merge(&mut usage, inodes, |u| &mut u.capacity_inodes);

        debug!(claims = usage.len(), "Fetched volume usage");
        Ok(usage)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct VectorSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// `[unix timestamp, "value"]`
    pub value: (f64, String),
}

/// Decode a query response, reporting the HTTP status of failed requests
///
/// Prometheus answers bad queries with a 4xx and a JSON error body, which is
/// more useful than the status. Anything else that is not a 2xx (proxy error
/// pages, empty bodies) is reported by its status.
pub fn decode_response(
    query: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> Result<Vec<VectorSample>> {
    if status.is_success() {
        return parse_vector_response(query, body);
    }

    match serde_json::from_str::<QueryResponse>(body) {
        Ok(response) if response.status == "error" => parse_vector_response(query, body),
        _ => Err(Error::MetricsQueryFailed {
            query: query.to_string(),
            message: format!("HTTP {}", status),
        }),
    }
}

/// Decode an instant-vector query response
pub fn parse_vector_response(query: &str, body: &str) -> Result<Vec<VectorSample>> {
    let response: QueryResponse = serde_json::from_str(body).map_err(|e| Error::MetricsQueryFailed {
        query: query.to_string(),
        message: format!("malformed response: {}", e),
    })?;

    if response.status != "success" {
        return Err(Error::MetricsQueryFailed {
            query: query.to_string(),
            message: format!(
                "{}: {}",
                response.error_type.as_deref().unwrap_or("error"),
                response.error.as_deref().unwrap_or("unknown error")
            ),
        });
    }

    let data = response.data.ok_or_else(|| Error::MetricsQueryFailed {
        query: query.to_string(),
        message: "response without data".to_string(),
    })?;
    if data.result_type != "vector" {
        return Err(Error::MetricsQueryFailed {
            query: query.to_string(),
            message: format!("expected vector result, got {}", data.result_type),
        });
    }
    Ok(data.result)
}

/// Fold samples into `usage`, keeping the largest value when series repeat
fn merge<F>(usage: &mut UsageByClaim, samples: Vec<VectorSample>, field: F)
where
    F: Fn(&mut VolumeUsage) -> &mut Option<u64>,
{
    for sample in samples {
        let (Some(namespace), Some(claim)) = (
            sample.metric.get("namespace"),
            sample.metric.get("persistentvolumeclaim"),
        ) else {
            continue;
        };
        let Ok(value) = sample.value.1.parse::<f64>() else {
            continue;
        };
        if !value.is_finite() || value < 0.0 {
            continue;
        }

        let value = value as u64;
        let slot = field(
            usage
                .entry(ObjectKey::namespaced(namespace.clone(), claim.clone()))
                .or_default(),
        );
        *slot = Some(slot.map_or(value, |existing| existing.max(value)));
    }
}
