//! Storage class lookup for expansion support

use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;

pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
pub const BETA_DEFAULT_CLASS_ANNOTATION: &str = "storageclass.beta.kubernetes.io/is-default-class";

/// Expansion support of every storage class plus the cluster default
#[derive(Clone, Debug, Default)]
pub struct StorageClasses {
    expandable: BTreeMap<String, bool>,
    default_class: Option<String>,
}

impl StorageClasses {
    pub fn new(classes: &[StorageClass]) -> Self {
        let mut expandable = BTreeMap::new();
        let mut default_class = None;

        for class in classes {
            let name = class.name_any();
            if is_default(class) && default_class.is_none() {
                default_class = Some(name.clone());
            }
            expandable.insert(name, class.allow_volume_expansion.unwrap_or(false));
        }

        Self {
            expandable,
            default_class,
        }
    }

    /// Class a claim ends up with: its own, or the cluster default
    pub fn resolve<'a>(&'a self, claim_class: Option<&'a str>) -> Option<&'a str> {
        claim_class
            .filter(|c| !c.is_empty())
            .or(self.default_class.as_deref())
    }

    /// Whether claims of `class` may grow; unknown classes may not
    pub fn allows_expansion(&self, class: Option<&str>) -> bool {
        self.resolve(class)
            .and_then(|name| self.expandable.get(name))
            .copied()
            .unwrap_or(false)
    }
}

fn is_default(class: &StorageClass) -> bool {
    let annotations = class.annotations();
    [DEFAULT_CLASS_ANNOTATION, BETA_DEFAULT_CLASS_ANNOTATION]
        .iter()
        .any(|a| annotations.get(*a).is_some_and(|v| v == "true"))
}
