//! Helper functions for common reconciliation patterns
//!
//! Object identity, finalizer lists, step timeouts and drift detection
//! shared by the Wukong and WukongSnapshot reconcilers.

use crate::error::ControllerError;
use cluster_client::OwnerRef;
use kube::Resource;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Returns `(namespace, name)` of a namespaced object.
///
/// # Errors
///
/// Returns `InvalidResource` when the object has no name.
pub fn object_ref<K: Resource>(obj: &K) -> Result<(String, String), ControllerError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidResource(format!("{} missing name", std::any::type_name::<K>())))?;
    let namespace = meta.namespace.clone().unwrap_or_else(|| "default".to_string());
    Ok((namespace, name))
}

/// Controller owner reference pointing at `obj`, `None` until the API
/// server assigned a uid.
pub fn owner_ref<K>(obj: &K) -> Option<OwnerRef>
where
    K: Resource<DynamicType = ()>,
{
    let meta = obj.meta();
    Some(OwnerRef {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
    })
}

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Current finalizers plus `finalizer`.
pub fn finalizers_with<K: Resource>(obj: &K, finalizer: &str) -> Vec<String> {
    let mut finalizers = obj.meta().finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    finalizers
}

/// Current finalizers minus `finalizer`.
pub fn finalizers_without<K: Resource>(obj: &K, finalizer: &str) -> Vec<String> {
    obj.meta()
        .finalizers
        .iter()
        .flatten()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect()
}

/// Runs one synthesis step under `limit`.
///
/// An elapsed timeout becomes `Cancelled`, which the state machine retries
/// without moving the instance to `Error`.
///
/// # Errors
///
/// Returns the step's own error, or `Cancelled` when the limit elapsed.
pub async fn with_timeout<T, F>(limit: Duration, step: &str, future: F) -> Result<T, ControllerError>
where
    F: Future<Output = Result<T, ControllerError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Step {} did not finish within {:?}", step, limit);
            Err(ControllerError::Cancelled(format!("{step} timed out after {limit:?}")))
        }
    }
}

/// Drift detection for server-side defaulted objects.
///
/// Returns `false` when every field of `desired` is present in `observed`
/// with the same value. Fields the API server or other controllers added to
/// `observed` are ignored; arrays must match element by element.
pub fn spec_needs_update(desired: &Value, observed: &Value) -> bool {
    !is_subset(desired, observed)
}

fn is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).is_some_and(|o| is_subset(v, o)) || (v.is_null() && !have.contains_key(k))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        (Value::Number(want), Value::Number(have)) => want.as_f64() == have.as_f64(),
        _ => desired == observed,
    }
}
