//! Kubernetes resource watchers.
//!
//! Each watched kind gets its own `kube_runtime::Controller`, driven by the
//! generic `watch_resource()` helper. The Wukong controller also watches the
//! objects it creates so their changes re-trigger the owning instance.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::ReconcileResult;
use crate::reconciler::Reconciler;
use crate::reconciler::vm::{INSTANCE_LABEL, MANAGED_BY, MANAGED_BY_LABEL};
use cluster_client::kinds;
use crds::{Wukong, WukongSnapshot};
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{ApiResource, DynamicObject};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Runs `controller` until its trigger streams end.
///
/// The reconcile wrapper records the pass outcome and duration, and resets the
/// per-object backoff after a successful pass. The error policy requeues with
/// that backoff.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    runtime_config: RuntimeConfig,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(resource_name, obj.as_ref());
        let (backoff, attempts) = ctx.next_backoff_for_resource(&key);
        error!(
            "Reconciliation error for {} (attempt {}), retrying in {}s: {}",
            key,
            attempts,
            backoff.as_secs(),
            error
        );
        Action::requeue(backoff)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(resource_name, obj.as_ref());
            debug!("Reconciling {}", key);
            let started = Instant::now();

            let result = reconcile_fn(ctx.clone(), obj).await;
            match &result {
                Ok(action) => {
                    let outcome = if *action == Action::await_change() {
                        ReconcileResult::Success
                    } else {
                        ReconcileResult::Requeue
                    };
                    ctx.metrics.observe_reconcile(resource_name, outcome, started.elapsed());
                    ctx.reset_error(&key);
                }
                Err(e) => {
                    ctx.metrics
                        .observe_reconcile(resource_name, ReconcileResult::Error, started.elapsed());
                    error!("Reconciliation failed for {}: {}", key, e);
                }
            }
            result
        }
    };

    controller
        .with_config(runtime_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    warn!("{} watcher stopped", resource_name);
    Ok(())
}

/// `Kind/namespace/name`, the key of the per-object backoff.
fn resource_key<K: kube::Resource>(kind: &str, obj: &K) -> String {
    format!("{}/{}/{}", kind, obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Maps a VirtualMachineInstance to the Wukong named by its instance label.
fn instance_owner(vmi: DynamicObject) -> Option<ObjectRef<Wukong>> {
    let namespace = vmi.namespace()?;
    let name = vmi.labels().get(INSTANCE_LABEL)?;
    Some(ObjectRef::new(name).within(&namespace))
}

/// Watches Wukong and WukongSnapshot resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    config: ControllerConfig,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, client: Client, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            client,
            config,
        }
    }

    fn typed_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn dynamic_api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        match &self.config.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .debounce(self.config.debounce)
            .concurrency(self.config.concurrency)
    }

    /// Watches Wukongs together with their VirtualMachines, DataVolumes,
    /// claims and VirtualMachineInstances.
    pub async fn watch_wukongs(&self) -> Result<(), ControllerError> {
        let managed = watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY}"));
        let vm_resource = kinds::virtual_machine();
        let dv_resource = kinds::data_volume();
        let vmi_resource = kinds::virtual_machine_instance();

        let controller = Controller::new(self.typed_api::<Wukong>(), watcher::Config::default())
            .owns_with(self.dynamic_api(&vm_resource), vm_resource, managed)
            .owns_with(self.dynamic_api(&dv_resource), dv_resource, watcher::Config::default())
            .owns(self.typed_api::<PersistentVolumeClaim>(), watcher::Config::default())
            .watches_with(
                self.dynamic_api(&vmi_resource),
                vmi_resource,
                watcher::Config::default().labels(INSTANCE_LABEL),
                instance_owner,
            );

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, wukong| Box::pin(async move { reconciler.reconcile_wukong(&wukong).await }),
            "Wukong",
            self.runtime_config(),
        )
        .await
    }

    /// Watches WukongSnapshots together with their VirtualMachineSnapshots.
    pub async fn watch_wukong_snapshots(&self) -> Result<(), ControllerError> {
        let snapshot_resource = kinds::virtual_machine_snapshot();

        let controller = Controller::new(self.typed_api::<WukongSnapshot>(), watcher::Config::default())
            .owns_with(
                self.dynamic_api(&snapshot_resource),
                snapshot_resource,
                watcher::Config::default(),
            );

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, snapshot| {
                Box::pin(async move { reconciler.reconcile_wukong_snapshot(&snapshot).await })
            },
            "WukongSnapshot",
            self.runtime_config(),
        )
        .await
    }
}
