//! Object identity shared by every model

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};

/// Controller owner of a generated object.
///
/// Cluster-scoped objects cannot be owned by namespaced ones, so only
/// namespaced models carry an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerRef {
    /// Builds the Kubernetes owner reference with `controller` and
    /// `blockOwnerDeletion` set.
    #[must_use]
    pub fn to_owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Name, namespace and owner of a namespaced object the controller creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
    pub owner: Option<OwnerRef>,
}

impl ObjectKey {
    /// Key without an owner.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            owner: None,
        }
    }

    /// Sets the controller owner.
    #[must_use]
    pub fn owned_by(mut self, owner: Option<OwnerRef>) -> Self {
        self.owner = owner;
        self
    }
}

/// Owner entry as observed on an existing object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservedOwner {
    pub kind: String,
    pub name: String,
    pub uid: String,
}
