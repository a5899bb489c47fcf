//! Shoot access secret for the custom metrics adapter
//!
//! The secret is a token-requestor secret: the token requestor fills in a
//! service account token for `kube-system/gardener-custom-metrics` so that the
//! adapter can scrape the shoot's API server. Issuing that token requires the
//! shoot CA bundle to be present in the control-plane namespace.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::controller::error::{Error, Result};
use crate::resources::common::standard_labels;

/// Name of the access secret
pub const ACCESS_SECRET_NAME: &str = "shoot-access-gardener-custom-metrics";

/// Service account the token is requested for
pub const SERVICE_ACCOUNT_NAME: &str = "gardener-custom-metrics";

/// Namespace of the service account inside the shoot
pub const SERVICE_ACCOUNT_NAMESPACE: &str = "kube-system";

/// Key of the CA bundle inside the CA secret
pub const CA_BUNDLE_KEY: &str = "bundle.crt";

pub const LABEL_PURPOSE: &str = "resources.gardener.cloud/purpose";
pub const LABEL_CLASS: &str = "resources.gardener.cloud/class";
pub const ANNOTATION_SERVICE_ACCOUNT_NAME: &str = "serviceaccount.resources.gardener.cloud/name";
pub const ANNOTATION_SERVICE_ACCOUNT_NAMESPACE: &str =
    "serviceaccount.resources.gardener.cloud/namespace";

/// Build the token-requestor secret
pub fn generate_access_secret(
    namespace: &str,
    deployment_name: &str,
    owner: Option<OwnerReference>,
) -> Secret {
    let mut labels = standard_labels(deployment_name);
    labels.insert(LABEL_PURPOSE.to_string(), "token-requestor".to_string());
    labels.insert(LABEL_CLASS.to_string(), "shoot".to_string());
    labels.insert("name".to_string(), ACCESS_SECRET_NAME.to_string());

    let annotations = BTreeMap::from([
        (
            ANNOTATION_SERVICE_ACCOUNT_NAME.to_string(),
            SERVICE_ACCOUNT_NAME.to_string(),
        ),
        (
            ANNOTATION_SERVICE_ACCOUNT_NAMESPACE.to_string(),
            SERVICE_ACCOUNT_NAMESPACE.to_string(),
        ),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(ACCESS_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Ensure the CA secret exists and carries a non-empty bundle
pub fn check_ca_bundle(ca_secret: Option<&Secret>, ca_secret_name: &str, namespace: &str) -> Result<()> {
    let missing = |detail: String| Error::MissingPrerequisite {
        subresource: format!("Secret '{}/{}'", namespace, ACCESS_SECRET_NAME),
        namespace: namespace.to_string(),
        detail,
    };

    let Some(secret) = ca_secret else {
        return Err(missing(format!("CA secret '{}' not found", ca_secret_name)));
    };

    let in_data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(CA_BUNDLE_KEY))
        .is_some_and(|v| !v.0.is_empty());
    let in_string_data = secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(CA_BUNDLE_KEY))
        .is_some_and(|v| !v.is_empty());

    if in_data || in_string_data {
        Ok(())
    } else {
        Err(missing(format!(
            "CA secret '{}' has no '{}' entry",
            ca_secret_name, CA_BUNDLE_KEY
        )))
    }
}
