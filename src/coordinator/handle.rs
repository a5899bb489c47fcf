//! Handle on the server-side HPA/VPA setup of one API server deployment

use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ApiResource;
use kube::core::ObjectMeta;
use tracing::{debug, info, instrument};

use crate::config::CoordinatorTuning;
use crate::controller::error::{Error, Result};
use crate::coordinator::policy::{CoordinatorState, DesiredStateParameters};
use crate::resources::access_secret::{ACCESS_SECRET_NAME, check_ca_bundle, generate_access_secret};
use crate::resources::common::role_labels;
use crate::resources::hpa::generate_hpa;
use crate::resources::vpa::{generate_vpa, vpa_resource};
use crate::store::{
    ObjectKey, ObjectStore, OperationResult, api_resource, describe, from_dynamic, reconcile_object,
    to_dynamic,
};

/// What a successful [`CustomMetricsHpa::reconcile`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Enabled {
        hpa: OperationResult,
        vpa: OperationResult,
        access_secret: OperationResult,
    },
    Disabled,
}

impl ReconcileOutcome {
    /// Whether any object was written
    pub fn changed(&self) -> bool {
        match self {
            ReconcileOutcome::Enabled {
                hpa,
                vpa,
                access_secret,
            } => [hpa, vpa, access_secret]
                .iter()
                .any(|r| **r != OperationResult::Unchanged),
            ReconcileOutcome::Disabled => false,
        }
    }
}

/// Stateless handle naming the HPA, VPA and access secret of one deployment
///
/// Two handles built from the same namespace and deployment name point at
/// the same server-side objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomMetricsHpa {
    namespace: String,
    deployment_name: String,
}

impl CustomMetricsHpa {
    pub fn new(namespace: impl Into<String>, deployment_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment_name: deployment_name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn deployment_name(&self) -> &str {
        &self.deployment_name
    }

    pub fn hpa_name(&self) -> String {
        format!("{}-cmh", self.deployment_name)
    }

    pub fn vpa_name(&self) -> String {
        format!("{}-cmh", self.deployment_name)
    }

    pub fn hpa_key(&self) -> ObjectKey {
        ObjectKey::namespaced(&self.namespace, self.hpa_name())
    }

    pub fn vpa_key(&self) -> ObjectKey {
        ObjectKey::namespaced(&self.namespace, self.vpa_name())
    }

    pub fn access_secret_key(&self) -> ObjectKey {
        ObjectKey::namespaced(&self.namespace, ACCESS_SECRET_NAME)
    }

    /// Every object this handle manages, in teardown order
    pub fn managed_objects(&self) -> [(ApiResource, ObjectKey); 3] {
        [
            (api_resource::<HorizontalPodAutoscaler>(), self.hpa_key()),
            (vpa_resource(), self.vpa_key()),
            (api_resource::<Secret>(), self.access_secret_key()),
        ]
    }

    fn target(&self) -> String {
        format!(
            "CustomMetricsHPA '{}' in namespace '{}'",
            self.deployment_name, self.namespace
        )
    }

    /// Bring the server-side setup in line with `params`
    ///
    /// Disabled parameters tear everything down. Otherwise HPA and VPA are
    /// reconciled concurrently, then the access secret. Each object is only
    /// written when it differs from its desired state. If any step fails the
    /// error names every failed object; objects that succeeded stay in place
    /// and the next pass completes the rest.
    #[instrument(skip(self, store, params, tuning), fields(namespace = %self.namespace, deployment = %self.deployment_name))]
    pub async fn reconcile(
        &self,
        store: &dyn ObjectStore,
        params: &DesiredStateParameters,
        tuning: &CoordinatorTuning,
    ) -> Result<ReconcileOutcome> {
        if !params.enabled {
            self.delete_from_server(store).await?;
            return Ok(ReconcileOutcome::Disabled);
        }

        let state = CoordinatorState::new(params, tuning)?;

        let (hpa, vpa) = tokio::join!(
            self.reconcile_hpa(store, &state, params),
            self.reconcile_vpa(store, &state, params),
        );
        let access_secret = self.reconcile_access_secret(store, params, tuning).await;

        match (hpa, vpa, access_secret) {
            (Ok(hpa), Ok(vpa), Ok(access_secret)) => {
                let outcome = ReconcileOutcome::Enabled {
                    hpa,
                    vpa,
                    access_secret,
                };
                if outcome.changed() {
                    info!(?hpa, ?vpa, ?access_secret, "Reconciled autoscaling policies");
                } else {
                    debug!("Autoscaling policies up to date");
                }
                Ok(outcome)
            }
            (hpa, vpa, access_secret) => Err(Error::ReconcileFailed {
                target: self.target(),
                failed: [hpa.err(), vpa.err(), access_secret.err()]
                    .into_iter()
                    .flatten()
                    .collect(),
            }),
        }
    }

    /// Remove the HPA, VPA and access secret
    ///
    /// Objects that are already gone count as deleted. Every object is
    /// attempted even if an earlier deletion fails.
    #[instrument(skip(self, store), fields(namespace = %self.namespace, deployment = %self.deployment_name))]
    pub async fn delete_from_server(&self, store: &dyn ObjectStore) -> Result<()> {
        let mut failed = Vec::new();

        for (resource, key) in self.managed_objects() {
            match store.delete(&resource, &key).await {
                Ok(true) => info!("Deleted {}", describe(&resource, &key)),
                Ok(false) => debug!("{} already absent", describe(&resource, &key)),
                Err(e) if e.is_not_found() => {}
                Err(e) => failed.push(e.in_subresource("delete", describe(&resource, &key))),
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::DeletionFailed {
                target: self.target(),
                failed,
            })
        }
    }

    fn metadata(&self, name: String, role: &str, params: &DesiredStateParameters) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(role_labels(&self.deployment_name, role)),
            owner_references: params.owner.clone().map(|o| vec![o]),
            ..Default::default()
        }
    }

    async fn reconcile_hpa(
        &self,
        store: &dyn ObjectStore,
        state: &CoordinatorState,
        params: &DesiredStateParameters,
    ) -> Result<OperationResult> {
        let resource = api_resource::<HorizontalPodAutoscaler>();
        let object = describe(&resource, &self.hpa_key());

        let hpa = generate_hpa(
            self.metadata(self.hpa_name(), "hpa", params),
            &self.deployment_name,
            &state.scaling,
        );
        let desired = to_dynamic(&hpa).map_err(|e| e.in_subresource("render", object.clone()))?;

        reconcile_object(store, &resource, &desired)
            .await
            .map_err(|e| e.in_subresource("apply", object))
    }

    async fn reconcile_vpa(
        &self,
        store: &dyn ObjectStore,
        state: &CoordinatorState,
        params: &DesiredStateParameters,
    ) -> Result<OperationResult> {
        let resource = vpa_resource();
        let object = describe(&resource, &self.vpa_key());

        let desired = generate_vpa(
            self.metadata(self.vpa_name(), "vpa", params),
            &state.vpa_spec(&self.deployment_name),
        )
        .map_err(|e| e.in_subresource("render", object.clone()))?;

        reconcile_object(store, &resource, &desired)
            .await
            .map_err(|e| e.in_subresource("apply", object))
    }

    async fn reconcile_access_secret(
        &self,
        store: &dyn ObjectStore,
        params: &DesiredStateParameters,
        tuning: &CoordinatorTuning,
    ) -> Result<OperationResult> {
        let resource = api_resource::<Secret>();
        let object = describe(&resource, &self.access_secret_key());

        let ca_key = ObjectKey::namespaced(&self.namespace, &tuning.ca_secret_name);
        let ca = store
            .get(&resource, &ca_key)
            .await
            .map_err(|e| e.in_subresource("read CA for", object.clone()))?
            .map(|obj| from_dynamic::<Secret>(&obj))
            .transpose()?;
        check_ca_bundle(ca.as_ref(), &tuning.ca_secret_name, &self.namespace)?;

        let secret = generate_access_secret(
            &self.namespace,
            &self.deployment_name,
            params.owner.clone(),
        );
        let desired = to_dynamic(&secret).map_err(|e| e.in_subresource("render", object.clone()))?;

        reconcile_object(store, &resource, &desired)
            .await
            .map_err(|e| e.in_subresource("apply", object))
    }
}
