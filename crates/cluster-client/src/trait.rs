//! ClusterClient trait for mocking
//!
//! This trait abstracts every Kubernetes call the Wukong controller makes.
//! `KubeClusterClient` implements it against a real API server, tests use
//! `MockClusterClient`.

use crate::error::ClusterError;
use crate::models::*;
use crds::{Wukong, WukongSnapshot, WukongSnapshotStatus, WukongStatus};
use std::collections::BTreeMap;

/// Trait for Kubernetes operations of the Wukong controller
///
/// Getters return `Ok(None)` for missing objects, deletes of missing objects
/// succeed, and creates of objects that already exist succeed. All async
/// methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // Wukong custom resources
    async fn get_wukong(&self, namespace: &str, name: &str) -> Result<Option<Wukong>, ClusterError>;
    /// Replaces `metadata.finalizers`, guarded by `resource_version` when given.
    async fn set_wukong_finalizers(&self, namespace: &str, name: &str, resource_version: Option<&str>, finalizers: &[String]) -> Result<(), ClusterError>;
    /// Writes the whole status in one request, guarded by `resource_version` when given.
    async fn patch_wukong_status(&self, namespace: &str, name: &str, resource_version: Option<&str>, status: &WukongStatus) -> Result<(), ClusterError>;
    async fn get_wukong_snapshot(&self, namespace: &str, name: &str) -> Result<Option<WukongSnapshot>, ClusterError>;
    async fn patch_wukong_snapshot_status(&self, namespace: &str, name: &str, status: &WukongSnapshotStatus) -> Result<(), ClusterError>;

    // Discovery
    async fn crd_exists(&self, name: &str) -> Result<bool, ClusterError>;

    // Networking
    async fn network_attachment_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;
    async fn create_network_attachment(&self, attachment: &NetworkAttachment) -> Result<(), ClusterError>;
    async fn get_node_network_policy(&self, name: &str) -> Result<Option<NodeNetworkPolicy>, ClusterError>;
    async fn create_node_network_policy(&self, policy: &NodeNetworkPolicy) -> Result<(), ClusterError>;
    async fn update_node_network_policy(&self, policy: &NodeNetworkPolicy) -> Result<(), ClusterError>;
    async fn delete_node_network_policy(&self, name: &str) -> Result<(), ClusterError>;
    /// Current IPv4 state of `interface` on the first node that reports it.
    async fn find_node_interface_ipv4(&self, interface: &str) -> Result<Option<NodeInterfaceIpv4>, ClusterError>;

    // Storage
    async fn get_data_volume(&self, namespace: &str, name: &str) -> Result<Option<DataVolumeObservation>, ClusterError>;
    async fn create_data_volume(&self, data_volume: &DataVolume) -> Result<(), ClusterError>;
    async fn delete_data_volume(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<ClaimObservation>, ClusterError>;
    async fn create_claim(&self, claim: &ClaimRequest) -> Result<(), ClusterError>;
    async fn expand_claim(&self, namespace: &str, name: &str, size: &str) -> Result<(), ClusterError>;
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClassInfo>, ClusterError>;
    async fn get_secret_data(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, Vec<u8>>>, ClusterError>;

    // Virtual machines
    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<Option<VirtualMachineObservation>, ClusterError>;
    async fn create_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ClusterError>;
    /// Replaces the managed part of an existing VirtualMachine.
    async fn update_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ClusterError>;
    async fn delete_virtual_machine(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<Option<InstanceObservation>, ClusterError>;

    // Snapshots
    async fn get_vm_snapshot(&self, namespace: &str, name: &str) -> Result<Option<SnapshotObservation>, ClusterError>;
    async fn create_vm_snapshot(&self, snapshot: &VirtualMachineSnapshot) -> Result<(), ClusterError>;
    async fn get_vm_restore(&self, namespace: &str, name: &str) -> Result<Option<RestoreObservation>, ClusterError>;
    async fn create_vm_restore(&self, restore: &VirtualMachineRestore) -> Result<(), ClusterError>;
}
