//! WukongSnapshot reconciler

use super::names;
use super::{RETRY_FAILED, RETRY_PENDING, RETRY_SNAPSHOT, Reconciler};
use crate::error::ControllerError;
use crate::reconcile_helpers::{object_ref, owner_ref};
use cluster_client::{ObjectKey, SnapshotSpec, VirtualMachineSnapshot, VmReference};
use crds::{SnapshotPhase, WukongSnapshot, WukongSnapshotStatus};
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

impl Reconciler {
    pub async fn reconcile_wukong_snapshot(&self, snapshot: &WukongSnapshot) -> Result<Action, ControllerError> {
        let (namespace, name) = object_ref(snapshot)?;
        let current = snapshot.status.clone().unwrap_or_default();

        match current.phase {
            Some(SnapshotPhase::Succeeded) => {
                debug!("WukongSnapshot {}/{} already succeeded", namespace, name);
                return Ok(Action::await_change());
            }
            // A failure reported by KubeVirt is final. Failures without a
            // snapshot object (missing instance) are retried.
            Some(SnapshotPhase::Failed) if current.snapshot_name.is_some() => {
                debug!("WukongSnapshot {}/{} failed terminally", namespace, name);
                return Ok(Action::await_change());
            }
            _ => {}
        }

        info!("Reconciling WukongSnapshot {}/{}", namespace, name);
        let wukong_name = &snapshot.spec.wukong_name;

        let Some(wukong) = self.client.get_wukong(&namespace, wukong_name).await? else {
            warn!("WukongSnapshot {}/{} refers to missing Wukong {}", namespace, name, wukong_name);
            let next = WukongSnapshotStatus {
                phase: Some(SnapshotPhase::Failed),
                error: Some(format!("Wukong {wukong_name} not found")),
                ..Default::default()
            };
            self.write_snapshot_status(&namespace, &name, &current, &next).await?;
            return Ok(Action::requeue(RETRY_FAILED));
        };

        let Some(vm_name) = wukong.status.as_ref().and_then(|s| s.vm_name.clone()) else {
            debug!("Wukong {}/{} has no VirtualMachine yet", namespace, wukong_name);
            let next = WukongSnapshotStatus {
                phase: Some(SnapshotPhase::Pending),
                ..Default::default()
            };
            self.write_snapshot_status(&namespace, &name, &current, &next).await?;
            return Ok(Action::requeue(RETRY_PENDING));
        };

        let vm_snapshot_name = names::vm_snapshot_name(&name);
        let Some(observed) = self.client.get_vm_snapshot(&namespace, &vm_snapshot_name).await? else {
            let request = VirtualMachineSnapshot {
                key: ObjectKey::new(&namespace, &vm_snapshot_name).owned_by(owner_ref(snapshot)),
                spec: SnapshotSpec {
                    source: VmReference::virtual_machine(&vm_name),
                },
            };
            self.client.create_vm_snapshot(&request).await?;
            info!("Created VirtualMachineSnapshot {}/{} of {}", namespace, vm_snapshot_name, vm_name);

            let next = WukongSnapshotStatus {
                phase: Some(SnapshotPhase::Creating),
                snapshot_name: Some(vm_snapshot_name),
                ..Default::default()
            };
            self.write_snapshot_status(&namespace, &name, &current, &next).await?;
            return Ok(Action::requeue(RETRY_SNAPSHOT));
        };

        let mut next = WukongSnapshotStatus {
            phase: Some(SnapshotPhase::Creating),
            snapshot_name: Some(vm_snapshot_name),
            ..Default::default()
        };
        let action = if observed.ready_to_use {
            next.phase = Some(SnapshotPhase::Succeeded);
            next.creation_time = observed
                .creation_time
                .or(current.creation_time)
                .or_else(|| Some(chrono::Utc::now()));
            info!("WukongSnapshot {}/{} is ready", namespace, name);
            Action::await_change()
        } else if observed.is_failed() {
            next.phase = Some(SnapshotPhase::Failed);
            next.error = Some(
                observed
                    .error
                    .unwrap_or_else(|| "VirtualMachineSnapshot failed".to_string()),
            );
            warn!("WukongSnapshot {}/{} failed: {:?}", namespace, name, next.error);
            Action::await_change()
        } else {
            Action::requeue(RETRY_PENDING)
        };

        self.write_snapshot_status(&namespace, &name, &current, &next).await?;
        Ok(action)
    }

    async fn write_snapshot_status(
        &self,
        namespace: &str,
        name: &str,
        current: &WukongSnapshotStatus,
        next: &WukongSnapshotStatus,
    ) -> Result<(), ControllerError> {
        if current == next {
            return Ok(());
        }
        self.client.patch_wukong_snapshot_status(namespace, name, next).await?;
        Ok(())
    }
}
