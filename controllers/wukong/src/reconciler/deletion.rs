//! Ordered teardown of a Wukong behind its finalizer.
//!
//! The VirtualMachine goes first and its instance must be gone before any
//! disk is touched. Disks must be confirmed absent before the finalizer is
//! released. Every step that has to wait requeues the pass.

use super::names;
use super::{RETRY_DELETION, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{finalizers_without, has_finalizer, object_ref};
use cluster_client::PolicyOwner;
use crds::{WUKONG_FINALIZER, Wukong};
use kube_runtime::controller::Action;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

impl Reconciler {
    pub(crate) async fn reconcile_deletion(&self, wukong: &Wukong) -> Result<Action, ControllerError> {
        let (namespace, name) = object_ref(wukong)?;
        if !has_finalizer(wukong, WUKONG_FINALIZER) {
            debug!("Wukong {}/{} is being deleted without our finalizer", namespace, name);
            return Ok(Action::await_change());
        }

        let vm_name = names::vm_name(&name);
        if self.client.get_virtual_machine(&namespace, &vm_name).await?.is_some() {
            self.client.delete_virtual_machine(&namespace, &vm_name).await?;
            info!("Deleting VirtualMachine {}/{}", namespace, vm_name);
            return Ok(Action::requeue(RETRY_DELETION));
        }
        if self
            .client
            .get_virtual_machine_instance(&namespace, &vm_name)
            .await?
            .is_some()
        {
            debug!("Waiting for VirtualMachineInstance {}/{} to go away", namespace, vm_name);
            return Ok(Action::requeue(RETRY_DELETION));
        }

        let mut claims: BTreeSet<String> = wukong
            .spec
            .disks
            .iter()
            .map(|d| names::disk_claim_name(&name, &d.name))
            .collect();
        if let Some(status) = &wukong.status {
            claims.extend(status.volumes.iter().map(|v| v.pvc_name.clone()));
        }

        let uid = wukong.metadata.uid.as_deref();
        let mut remaining = false;
        for claim_name in &claims {
            remaining |= self.delete_disk(&namespace, claim_name, uid).await?;
        }
        if remaining {
            return Ok(Action::requeue(RETRY_DELETION));
        }

        let owner = PolicyOwner::new(&namespace, &name);
        for net in &wukong.spec.networks {
            if !net.network_type.is_some_and(|t| t.needs_node_bridge()) {
                continue;
            }
            let policy = names::node_policy_name(&name, &net.name);
            self.delete_node_policy(&policy, &owner).await;
        }

        let finalizers = finalizers_without(wukong, WUKONG_FINALIZER);
        self.client
            .set_wukong_finalizers(&namespace, &name, wukong.metadata.resource_version.as_deref(), &finalizers)
            .await?;
        info!("Teardown of Wukong {}/{} complete, finalizer removed", namespace, name);
        Ok(Action::await_change())
    }

    /// Best-effort delete of a node network policy declared for `owner`.
    async fn delete_node_policy(&self, policy: &str, owner: &PolicyOwner) {
        match self.client.get_node_network_policy(policy).await {
            Ok(None) => {}
            Ok(Some(existing)) if existing.owner.as_ref() != Some(owner) => {
                let holder = existing.owner.map_or_else(|| "nobody".to_string(), |o| o.to_string());
                warn!(
                    "NodeNetworkConfigurationPolicy {} is labelled for {}, not {}; leaving it in place",
                    policy, holder, owner
                );
            }
            Ok(Some(_)) => {
                if let Err(e) = self.client.delete_node_network_policy(policy).await {
                    warn!("Failed to delete NodeNetworkConfigurationPolicy {}: {}", policy, e);
                } else {
                    info!("Deleted NodeNetworkConfigurationPolicy {}", policy);
                }
            }
            Err(e) => warn!("Failed to look up NodeNetworkConfigurationPolicy {}: {}", policy, e),
        }
    }

    /// Deletes the backing object of one disk. Returns whether something is still there.
    async fn delete_disk(&self, namespace: &str, name: &str, owner_uid: Option<&str>) -> Result<bool, ControllerError> {
        if self.client.get_data_volume(namespace, name).await?.is_some() {
            self.client.delete_data_volume(namespace, name).await?;
            info!("Deleting DataVolume {}/{}", namespace, name);
            return Ok(true);
        }

        let Some(claim) = self.client.get_claim(namespace, name).await? else {
            return Ok(false);
        };
        if claim.owners.iter().any(|o| o.kind == "DataVolume" && o.name == name) {
            debug!("Waiting for claim {}/{} of a deleted DataVolume to go away", namespace, name);
            return Ok(true);
        }
        let foreign = claim.owners.iter().find(|o| Some(o.uid.as_str()) != owner_uid);
        if let Some(other) = foreign {
            warn!(
                "Claim {}/{} is owned by {} {}, leaving it in place",
                namespace, name, other.kind, other.name
            );
            return Ok(false);
        }

        self.client.delete_claim(namespace, name).await?;
        info!("Deleting PersistentVolumeClaim {}/{}", namespace, name);
        Ok(true)
    }
}
