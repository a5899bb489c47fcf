//! Waiting for objects to become healthy or disappear
//!
//! Both waits poll the store, return as soon as the object is in the target
//! state (including on the very first read) and fail with
//! [`Error::Timeout`] naming the object once the deadline passes.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::store::{ObjectKey, ObjectStore, describe};

/// Condition types that report the health of managed objects
pub const HEALTH_CONDITIONS: &[&str] = &["ResourcesApplied", "ResourcesHealthy", "Available"];

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ObjectWaiter {
    store: Arc<dyn ObjectStore>,
    poll_interval: Duration,
}

impl ObjectWaiter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait until the object exists and passes [`is_healthy`]
    pub async fn wait_until_healthy(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        timeout: Duration,
    ) -> Result<()> {
        self.wait_for(resource, key, timeout, "healthy", |obj| {
            obj.is_some_and(is_healthy)
        })
        .await
    }

    /// Wait until the object no longer exists
    pub async fn wait_until_deleted(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        timeout: Duration,
    ) -> Result<()> {
        self.wait_for(resource, key, timeout, "deleted", |obj| obj.is_none())
            .await
    }

    async fn wait_for<F>(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        timeout: Duration,
        condition: &'static str,
        reached: F,
    ) -> Result<()>
    where
        F: Fn(Option<&DynamicObject>) -> bool,
    {
        let poll = async {
            loop {
                let current = self
                    .store
                    .get(resource, key)
                    .await
                    .map_err(|e| e.in_subresource("read", describe(resource, key)))?;
                if reached(current.as_ref()) {
                    return Ok(());
                }
                debug!("Waiting for {} to become {}", describe(resource, key), condition);
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                object: describe(resource, key),
                condition,
                timeout,
            }),
        }
    }
}

/// Whether an object reports itself as healthy
///
/// The controller must have observed the current generation, and every
/// present health condition must be `True`. At least one of them has to be
/// present.
pub fn is_healthy(obj: &DynamicObject) -> bool {
    let status = obj.data.get("status");

    let observed = status
        .and_then(|s| s.get("observedGeneration"))
        .and_then(Value::as_i64);
    if let (Some(observed), Some(generation)) = (observed, obj.metadata.generation) {
        if observed < generation {
            return false;
        }
    }

    let conditions = status
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut seen = false;
    for condition in conditions {
        let Some(type_) = condition.get("type").and_then(Value::as_str) else {
            continue;
        };
        if !HEALTH_CONDITIONS.contains(&type_) {
            continue;
        }
        seen = true;
        if condition.get("status").and_then(Value::as_str) != Some("True") {
            return false;
        }
    }
    seen
}
