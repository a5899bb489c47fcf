//! Object store abstraction over the Kubernetes API
//!
//! Both the volume autoscaler and the coordinator talk to the API server through
//! the [`ObjectStore`] trait so that the decision logic can be exercised against
//! an in-memory store in tests. Objects are exchanged as [`DynamicObject`]s keyed
//! by their [`ApiResource`]; typed objects convert with [`to_dynamic`] and
//! [`from_dynamic`].

use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::resources::common::FIELD_MANAGER;

/// Namespace/name pair identifying an object of a given resource type
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// `None` for cluster-scoped objects
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn of(obj: &DynamicObject) -> Result<Self> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        Ok(Self {
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Human readable "Kind namespace/name" used in error context
pub fn describe(resource: &ApiResource, key: &ObjectKey) -> String {
    format!("{} '{}'", resource.kind, key)
}

/// Typed get/list/apply/patch/delete capability over the API server
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    /// List objects, optionally restricted to one namespace
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create or update an object to the given full desired state
    async fn apply(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject>;

    /// Apply a JSON merge patch to an existing object
    async fn merge_patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject>;

    /// Apply a JSON merge patch to the status subresource of an existing object
    async fn merge_patch_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject>;

    /// Delete an object. Returns `false` if it was already absent.
    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool>;
}

/// [`ObjectStore`] backed by a live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        let api = self.api(resource, key.namespace.as_deref());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(resource, namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn apply(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(object)?;
        let api = self.api(resource, key.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let applied = api.patch(&key.name, &params, &Patch::Apply(object)).await?;
        debug!("Applied {}", describe(resource, &key));
        Ok(applied)
    }

    async fn merge_patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject> {
        let api = self.api(resource, key.namespace.as_deref());
        let patched = api
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        debug!("Patched {}", describe(resource, key));
        Ok(patched)
    }

    async fn merge_patch_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject> {
        let api = self.api(resource, key.namespace.as_deref());
        let patched = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        debug!("Patched status of {}", describe(resource, key));
        Ok(patched)
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool> {
        let api = self.api(resource, key.namespace.as_deref());
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => {
                debug!("Deleted {}", describe(resource, key));
                Ok(true)
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// [`ApiResource`] of a typed Kubernetes object
pub fn api_resource<K>() -> ApiResource
where
    K: Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

/// Convert a typed object into a [`DynamicObject`]
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert a [`DynamicObject`] into a typed object
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// What [`reconcile_object`] did to the server-side object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

/// Bring one server-side object to its desired state
///
/// Reads the current object first and only writes when a field we manage
/// differs, so repeating a reconciliation with unchanged inputs issues no writes.
pub async fn reconcile_object(
    store: &dyn ObjectStore,
    resource: &ApiResource,
    desired: &DynamicObject,
) -> Result<OperationResult> {
    let key = ObjectKey::of(desired)?;

    match store.get(resource, &key).await? {
        None => {
            store.apply(resource, desired).await?;
            Ok(OperationResult::Created)
        }
        Some(existing) if is_up_to_date(&existing, desired)? => Ok(OperationResult::Unchanged),
        Some(_) => {
            store.apply(resource, desired).await?;
            Ok(OperationResult::Updated)
        }
    }
}

/// Metadata fields the operator sets and therefore compares
const MANAGED_METADATA: &[&str] = &["name", "namespace", "labels", "annotations", "ownerReferences"];

/// Spec fields the API server fills in when the rendered object leaves them out
const SERVER_DEFAULTED: &[&str] = &[
    "/spec/behavior/scaleUp/policies",
    "/spec/behavior/scaleUp/selectPolicy",
    "/spec/behavior/scaleUp/tolerance",
    "/spec/behavior/scaleDown/policies",
    "/spec/behavior/scaleDown/selectPolicy",
    "/spec/behavior/scaleDown/tolerance",
];

/// Whether `existing` already matches `desired`
///
/// Metadata, and top-level fields other than `spec`, only need to contain
/// what we render since other controllers add labels, annotations and
/// secret data. The `spec` must match exactly, so a field dropped from the
/// desired state is detected and pruned by the next apply.
fn is_up_to_date(existing: &DynamicObject, desired: &DynamicObject) -> Result<bool> {
    let mut existing = serde_json::to_value(existing)?;
    let mut desired = serde_json::to_value(desired)?;

    if let Some(Value::Object(meta)) = desired.get_mut("metadata") {
        meta.retain(|k, _| MANAGED_METADATA.contains(&k.as_str()));
    }

    for pointer in SERVER_DEFAULTED {
        if desired.pointer(pointer).is_none() {
            remove_pointer(&mut existing, pointer);
        }
    }

    let live_spec = take_spec(&mut existing);
    let desired_spec = take_spec(&mut desired);

    Ok(json_contains(&existing, &desired) && json_equivalent(&live_spec, &desired_spec))
}

fn take_spec(value: &mut Value) -> Value {
    value
        .as_object_mut()
        .and_then(|obj| obj.remove("spec"))
        .unwrap_or(Value::Null)
}

fn remove_pointer(value: &mut Value, pointer: &str) {
    let Some((parent, field)) = pointer.rsplit_once('/') else {
        return;
    };
    if let Some(Value::Object(map)) = value.pointer_mut(parent) {
        map.remove(field);
    }
}

/// Whether every field present in `expected` has the same value in `actual`
///
/// Fields only present in `actual` (server-side defaults, status) are ignored.
/// Arrays must have the same length and match element-wise.
pub fn json_contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (_, Value::Null) => true,
        (Value::Object(a), Value::Object(e)) => e.iter().all(|(k, ev)| match a.get(k) {
            Some(av) => json_contains(av, ev),
            None => ev.is_null(),
        }),
        (Value::Array(a), Value::Array(e)) => {
            a.len() == e.len() && a.iter().zip(e).all(|(av, ev)| json_contains(av, ev))
        }
        (a, e) => a == e,
    }
}

/// Structural equality where an absent field equals an empty one
///
/// `null`, `[]` and `{}` match a missing key, since the API server may drop
/// empty collections on write.
pub fn json_equivalent(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(a), Value::Object(e)) => {
            e.iter().all(|(k, ev)| match a.get(k) {
                Some(av) => json_equivalent(av, ev),
                None => is_empty(ev),
            }) && a.iter().all(|(k, av)| e.contains_key(k) || is_empty(av))
        }
        (Value::Array(a), Value::Array(e)) => {
            a.len() == e.len() && a.iter().zip(e).all(|(av, ev)| json_equivalent(av, ev))
        }
        (a, e) => a == e || (is_empty(a) && is_empty(e)),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
