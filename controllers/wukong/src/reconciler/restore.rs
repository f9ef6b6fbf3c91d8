//! Restore of a Wukong from one of its snapshots
//!
//! The VirtualMachine is kept halted while a restore is outstanding. The
//! VirtualMachineRestore is only created once the guest is gone, and the
//! snapshot is recorded in `status.restoredFrom` when KubeVirt reports it
//! complete, which also ends the restore on later passes.

use super::names;
use super::{RETRY_PENDING, RETRY_SNAPSHOT, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{object_ref, owner_ref};
use cluster_client::{ObjectKey, RestoreSpec, VirtualMachineRestore, VmReference};
use crds::{SnapshotPhase, Wukong};
use std::time::Duration;
use tracing::{debug, info};

/// Where an instance stands with respect to `restoreFromSnapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStep {
    /// Nothing to restore, or the requested snapshot was already restored
    Idle,
    /// The restore just finished
    Completed(String),
    /// Keep the guest halted and look again after `requeue`
    Waiting { requeue: Duration, message: String },
}

impl Reconciler {
    /// Advances an outstanding restore by at most one step.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotFailed` when the snapshot is missing or failed.
    pub(crate) async fn restore_step(&self, wukong: &Wukong) -> Result<RestoreStep, ControllerError> {
        let Some(snapshot_name) = wukong.spec.restore_from_snapshot.as_deref() else {
            return Ok(RestoreStep::Idle);
        };
        let restored_from = wukong.status.as_ref().and_then(|s| s.restored_from.as_deref());
        if restored_from == Some(snapshot_name) {
            return Ok(RestoreStep::Idle);
        }

        let (namespace, instance) = object_ref(wukong)?;
        let snapshot = self
            .client
            .get_wukong_snapshot(&namespace, snapshot_name)
            .await?
            .ok_or_else(|| ControllerError::SnapshotFailed(format!("WukongSnapshot {snapshot_name} not found")))?;
        let status = snapshot.status.unwrap_or_default();
        match status.phase {
            Some(SnapshotPhase::Succeeded) => {}
            Some(SnapshotPhase::Failed) => {
                return Err(ControllerError::SnapshotFailed(format!(
                    "WukongSnapshot {snapshot_name} failed: {}",
                    status.error.unwrap_or_default()
                )));
            }
            _ => {
                return Ok(RestoreStep::Waiting {
                    requeue: RETRY_PENDING,
                    message: format!("waiting for WukongSnapshot {snapshot_name} to succeed"),
                });
            }
        }
        let Some(vm_snapshot) = status.snapshot_name else {
            return Err(ControllerError::SnapshotFailed(format!(
                "WukongSnapshot {snapshot_name} succeeded without a snapshot name"
            )));
        };

        let restore_name = names::vm_restore_name(&instance, snapshot_name);
        if let Some(restore) = self.client.get_vm_restore(&namespace, &restore_name).await? {
            if restore.complete {
                info!("Restored {}/{} from snapshot {}", namespace, instance, snapshot_name);
                return Ok(RestoreStep::Completed(snapshot_name.to_string()));
            }
            return Ok(RestoreStep::Waiting {
                requeue: RETRY_SNAPSHOT,
                message: format!("restoring from snapshot {snapshot_name}"),
            });
        }

        let vm_name = names::vm_name(&instance);
        let vm_exists = self.client.get_virtual_machine(&namespace, &vm_name).await?.is_some();
        let guest_running = self
            .client
            .get_virtual_machine_instance(&namespace, &vm_name)
            .await?
            .is_some();
        if !vm_exists || guest_running {
            debug!("Waiting for {}/{} to stop before restoring {}", namespace, vm_name, snapshot_name);
            return Ok(RestoreStep::Waiting {
                requeue: RETRY_PENDING,
                message: format!("stopping guest to restore snapshot {snapshot_name}"),
            });
        }

        let restore = VirtualMachineRestore {
            key: ObjectKey::new(&namespace, &restore_name).owned_by(owner_ref(wukong)),
            spec: RestoreSpec {
                target: VmReference::virtual_machine(&vm_name),
                virtual_machine_snapshot_name: vm_snapshot,
            },
        };
        self.client.create_vm_restore(&restore).await?;
        info!("Created VirtualMachineRestore {}/{}", namespace, restore_name);
        Ok(RestoreStep::Waiting {
            requeue: RETRY_SNAPSHOT,
            message: format!("restoring from snapshot {snapshot_name}"),
        })
    }
}
