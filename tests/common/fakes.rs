//! In-memory stand-ins for the API server and the metrics backend
//!
//! [`FakeStore`] keeps objects in a map keyed by resource plural and object
//! key, counts every write and can be told to fail a given operation on a
//! given resource.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use serde::Serialize;
use serde_json::Value;

use gardener_scaling::Error;
use gardener_scaling::controller::error::Result;
use gardener_scaling::store::{ObjectKey, ObjectStore, to_dynamic};
use gardener_scaling::volume::{MetricsSource, UsageByClaim, VolumeUsage};

/// Store operation, used to target injected failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Get,
    List,
    Apply,
    Patch,
    PatchStatus,
    Delete,
}

/// Build an API error response with the given HTTP code
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} (injected)", reason),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<BTreeMap<(String, ObjectKey), DynamicObject>>,
    failures: Mutex<BTreeMap<(String, Op), u16>>,
    writes: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting a write
    pub fn insert(&self, resource: &ApiResource, obj: DynamicObject) {
        let key = ObjectKey::of(&obj).expect("seeded object needs a name");
        self.objects
            .lock()
            .unwrap()
            .insert((resource.plural.clone(), key), obj);
    }

    /// Seed a typed object without counting a write
    pub fn insert_typed<K: Serialize>(&self, resource: &ApiResource, obj: &K) {
        self.insert(resource, to_dynamic(obj).unwrap());
    }

    /// Remove an object behind the store's back
    pub fn remove(&self, resource: &ApiResource, key: &ObjectKey) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(resource.plural.clone(), key.clone()));
    }

    pub fn get_object(&self, resource: &ApiResource, key: &ObjectKey) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(resource.plural.clone(), key.clone()))
            .cloned()
    }

    /// Value at a JSON pointer of a stored object
    pub fn field(&self, resource: &ApiResource, key: &ObjectKey, pointer: &str) -> Option<Value> {
        let obj = self.get_object(resource, key)?;
        serde_json::to_value(obj).unwrap().pointer(pointer).cloned()
    }

    pub fn contains(&self, resource: &ApiResource, key: &ObjectKey) -> bool {
        self.get_object(resource, key).is_some()
    }

    pub fn count(&self, resource: &ApiResource) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(plural, _)| *plural == resource.plural)
            .count()
    }

    /// Number of apply, patch and delete calls that reached the store
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every `op` on `resource` fail with a 500
    pub fn fail_on(&self, resource: &ApiResource, op: Op) {
        self.fail_with(resource, op, 500);
    }

    pub fn fail_with(&self, resource: &ApiResource, op: Op, code: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert((resource.plural.clone(), op), code);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn check(&self, resource: &ApiResource, op: Op) -> Result<()> {
        match self
            .failures
            .lock()
            .unwrap()
            .get(&(resource.plural.clone(), op))
        {
            Some(code) => Err(api_error(*code, "InternalError")),
            None => Ok(()),
        }
    }

    fn patch_with(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
        status_only: bool,
    ) -> Result<DynamicObject> {
        let mut objects = self.objects.lock().unwrap();
        let Some(existing) = objects.get(&(resource.plural.clone(), key.clone())) else {
            return Err(api_error(404, "NotFound"));
        };

        let mut value = serde_json::to_value(existing)?;
        match (status_only, patch.get("status")) {
            (true, Some(status)) => {
                let mut wrapped = serde_json::json!({});
                wrapped["status"] = status.clone();
                merge(&mut value, &wrapped);
            }
            (true, None) => {}
            (false, _) => merge(&mut value, patch),
        }

        let patched: DynamicObject = serde_json::from_value(value)?;
        objects.insert((resource.plural.clone(), key.clone()), patched.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(patched)
    }
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            let target = target.as_object_mut().unwrap();
            for (k, v) in fields {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        self.check(resource, Op::Get)?;
        Ok(self.get_object(resource, key))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        self.check(resource, Op::List)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((plural, key), _)| {
                *plural == resource.plural
                    && namespace.is_none_or(|ns| key.namespace.as_deref() == Some(ns))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn apply(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        self.check(resource, Op::Apply)?;
        let key = ObjectKey::of(object)?;
        let mut objects = self.objects.lock().unwrap();
        let entry = (resource.plural.clone(), key);

        let mut applied = object.clone();
        // Server-owned parts survive an apply
        if let Some(existing) = objects.get(&entry) {
            applied.metadata.uid = existing.metadata.uid.clone();
            applied.metadata.finalizers = existing.metadata.finalizers.clone();
            if let Some(status) = existing.data.get("status") {
                applied.data["status"] = status.clone();
            }
        }

        objects.insert(entry, applied.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(applied)
    }

    async fn merge_patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject> {
        self.check(resource, Op::Patch)?;
        self.patch_with(resource, key, patch, false)
    }

    async fn merge_patch_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject> {
        self.check(resource, Op::PatchStatus)?;
        self.patch_with(resource, key, patch, true)
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool> {
        self.check(resource, Op::Delete)?;
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&(resource.plural.clone(), key.clone()))
            .is_some();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }
}

/// Metrics source returning canned usage
#[derive(Default)]
pub struct FakeMetricsSource {
    usage: Mutex<UsageByClaim>,
    failing: AtomicBool,
}

impl FakeMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `used` of `capacity` bytes for a claim
    pub fn set_bytes(&self, namespace: &str, claim: &str, used: u64, capacity: u64) {
        let mut usage = self.usage.lock().unwrap();
        let entry = usage
            .entry(ObjectKey::namespaced(namespace, claim))
            .or_default();
        entry.used_bytes = Some(used);
        entry.capacity_bytes = Some(capacity);
    }

    pub fn set_inodes(&self, namespace: &str, claim: &str, used: u64, capacity: u64) {
        let mut usage = self.usage.lock().unwrap();
        let entry = usage
            .entry(ObjectKey::namespaced(namespace, claim))
            .or_default();
        entry.used_inodes = Some(used);
        entry.capacity_inodes = Some(capacity);
    }

    pub fn set(&self, namespace: &str, claim: &str, usage: VolumeUsage) {
        self.usage
            .lock()
            .unwrap()
            .insert(ObjectKey::namespaced(namespace, claim), usage);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetricsSource for FakeMetricsSource {
    async fn volume_usage(&self) -> Result<UsageByClaim> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::MetricsQueryFailed {
                query: "kubelet_volume_stats_used_bytes".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.usage.lock().unwrap().clone())
    }
}
