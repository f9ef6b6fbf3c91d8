//! KubeVirt VirtualMachineSnapshot and VirtualMachineRestore documents

use super::meta::ObjectKey;
use serde::Serialize;

/// API group of the object a snapshot or restore points at.
pub const VM_API_GROUP: &str = "kubevirt.io";

/// Reference to the VirtualMachine being captured or restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmReference {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

impl VmReference {
    /// Reference to VirtualMachine `name`.
    pub fn virtual_machine(name: impl Into<String>) -> Self {
        Self {
            api_group: VM_API_GROUP.to_string(),
            kind: "VirtualMachine".to_string(),
            name: name.into(),
        }
    }
}

/// A VirtualMachineSnapshot (`snapshot.kubevirt.io/v1beta1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineSnapshot {
    pub key: ObjectKey,
    pub spec: SnapshotSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSpec {
    pub source: VmReference,
}

/// What the controller needs from an existing snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotObservation {
    pub ready_to_use: bool,
    pub phase: Option<String>,
    pub creation_time: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

impl SnapshotObservation {
    /// Whether KubeVirt gave up on the snapshot.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.phase.as_deref(), Some("Failed"))
    }
}

/// A VirtualMachineRestore (`snapshot.kubevirt.io/v1beta1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineRestore {
    pub key: ObjectKey,
    pub spec: RestoreSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    pub target: VmReference,
    pub virtual_machine_snapshot_name: String,
}

/// What the controller needs from an existing restore.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestoreObservation {
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_restore_spec_json() {
        let spec = RestoreSpec {
            target: VmReference::virtual_machine("vm1-vm"),
            virtual_machine_snapshot_name: "nightly-vmsnapshot".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({
                "target": {"apiGroup": "kubevirt.io", "kind": "VirtualMachine", "name": "vm1-vm"},
                "virtualMachineSnapshotName": "nightly-vmsnapshot"
            })
        );
    }
}
