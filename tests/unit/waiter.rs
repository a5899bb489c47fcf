//! Unit tests for the object lifecycle waiter
//!
//! Time is paused, so the polling loops run instantly while the timeouts
//! still behave as if real time passed.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{ApiResource, DynamicObject};
use serde_json::json;

use gardener_scaling::Error;
use gardener_scaling::store::ObjectKey;
use gardener_scaling::waiter::ObjectWaiter;

use crate::common::*;

fn managed_resource() -> ApiResource {
    ApiResource {
        group: "resources.gardener.cloud".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "resources.gardener.cloud/v1alpha1".to_string(),
        kind: "ManagedResource".to_string(),
        plural: "managedresources".to_string(),
    }
}

fn key() -> ObjectKey {
    ObjectKey::namespaced(NAMESPACE, "gardener-custom-metrics")
}

fn managed(healthy: bool) -> DynamicObject {
    let status = if healthy { "True" } else { "False" };
    let mut obj: DynamicObject = serde_json::from_value(json!({
        "apiVersion": "resources.gardener.cloud/v1alpha1",
        "kind": "ManagedResource",
        "metadata": {"name": "gardener-custom-metrics", "namespace": NAMESPACE},
        "status": {
            "observedGeneration": 1,
            "conditions": [
                {"type": "ResourcesApplied", "status": "True"},
                {"type": "ResourcesHealthy", "status": status}
            ]
        }
    }))
    .unwrap();
    obj.metadata.generation = Some(1);
    obj
}

fn waiter(store: &Arc<FakeStore>) -> ObjectWaiter {
    ObjectWaiter::new(store.clone()).with_poll_interval(Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn test_deleted_returns_immediately_for_absent_object() {
    let store = Arc::new(FakeStore::new());
    waiter(&store)
        .wait_until_deleted(&managed_resource(), &key(), Duration::from_secs(10))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deleted_waits_for_removal() {
    let store = Arc::new(FakeStore::new());
    store.insert(&managed_resource(), managed(true));

    let remover = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            store.remove(&managed_resource(), &key());
        })
    };

    waiter(&store)
        .wait_until_deleted(&managed_resource(), &key(), Duration::from_secs(30))
        .await
        .unwrap();
    remover.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deleted_times_out_naming_the_object() {
    let store = Arc::new(FakeStore::new());
    store.insert(&managed_resource(), managed(true));

    let err = waiter(&store)
        .wait_until_deleted(&managed_resource(), &key(), Duration::from_secs(10))
        .await
        .unwrap_err();

    match &err {
        Error::Timeout {
            object,
            condition,
            timeout,
        } => {
            assert!(object.contains("ManagedResource"));
            assert!(object.contains("shoot--dev--a/gardener-custom-metrics"));
            assert_eq!(*condition, "deleted");
            assert_eq!(*timeout, Duration::from_secs(10));
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_healthy_returns_immediately_when_already_healthy() {
    let store = Arc::new(FakeStore::new());
    store.insert(&managed_resource(), managed(true));

    waiter(&store)
        .wait_until_healthy(&managed_resource(), &key(), Duration::from_secs(1))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_healthy_waits_for_conditions() {
    let store = Arc::new(FakeStore::new());
    store.insert(&managed_resource(), managed(false));

    let healer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            store.insert(&managed_resource(), managed(true));
        })
    };

    waiter(&store)
        .wait_until_healthy(&managed_resource(), &key(), Duration::from_secs(30))
        .await
        .unwrap();
    healer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_healthy_times_out_for_missing_object() {
    let store = Arc::new(FakeStore::new());

    let err = waiter(&store)
        .wait_until_healthy(&managed_resource(), &key(), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { condition: "healthy", .. }));
}

#[tokio::test(start_paused = true)]
async fn test_read_errors_end_the_wait() {
    let store = Arc::new(FakeStore::new());
    store.fail_with(&managed_resource(), Op::Get, 403);

    let err = waiter(&store)
        .wait_until_deleted(&managed_resource(), &key(), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Subresource { .. }));
    assert!(!err.is_retryable());
}
