//! Deterministic names of the objects created for an instance.
//!
//! Names never depend on cluster state, so every pass addresses the same
//! objects and a restarted controller finds what it created before.

/// VirtualMachine, and the VirtualMachineInstance KubeVirt derives from it.
pub fn vm_name(instance: &str) -> String {
    format!("{instance}-vm")
}

pub fn network_attachment_name(instance: &str, network: &str) -> String {
    format!("{instance}-{network}-nad")
}

/// Cluster-scoped, hence prefixed by the instance name. Same-named
/// instances in different namespaces map to the same policy; the owner
/// labels on the policy decide which of them may change or delete it.
pub fn node_policy_name(instance: &str, network: &str) -> String {
    format!("{instance}-{network}-bridge")
}

/// Claim or DataVolume backing a disk.
pub fn disk_claim_name(instance: &str, disk: &str) -> String {
    format!("{instance}-{disk}")
}

pub fn vm_snapshot_name(snapshot: &str) -> String {
    format!("{snapshot}-vmsnapshot")
}

pub fn vm_restore_name(instance: &str, snapshot: &str) -> String {
    format!("{instance}-restore-{snapshot}")
}
