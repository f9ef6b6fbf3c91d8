//! Mock ClusterClient for unit testing
//!
//! Stores objects in memory and records every mutating call, so tests can
//! assert on ordering and on the absence of redundant creates. Status of
//! dependent objects (claim phase, guest phase, snapshot readiness) is set
//! by the test to simulate the platform progressing between passes.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::models::*;
use crds::{Wukong, WukongSnapshot, WukongSnapshotStatus, WukongStatus};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failure injected into the next call of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Cancelled,
    Conflict,
    Server,
}

impl MockFailure {
    fn into_error(self, operation: &str) -> ClusterError {
        match self {
            Self::Cancelled => ClusterError::Cancelled(format!("{operation} interrupted")),
            Self::Conflict => ClusterError::Conflict(format!("{operation} conflicted")),
            Self::Server => ClusterError::InvalidObject(format!("{operation} failed")),
        }
    }
}

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    wukongs: Arc<Mutex<HashMap<Key, Wukong>>>,
    wukong_snapshots: Arc<Mutex<HashMap<Key, WukongSnapshot>>>,
    crds: Arc<Mutex<HashSet<String>>>,
    attachments: Arc<Mutex<HashMap<Key, NetworkAttachment>>>,
    policies: Arc<Mutex<HashMap<String, NodeNetworkPolicy>>>,
    node_interfaces: Arc<Mutex<HashMap<String, NodeInterfaceIpv4>>>,
    data_volumes: Arc<Mutex<HashMap<Key, (DataVolume, DataVolumeObservation)>>>,
    claims: Arc<Mutex<HashMap<Key, ClaimObservation>>>,
    storage_classes: Arc<Mutex<HashMap<String, StorageClassInfo>>>,
    secrets: Arc<Mutex<HashMap<Key, BTreeMap<String, Vec<u8>>>>>,
    vms: Arc<Mutex<HashMap<Key, VirtualMachine>>>,
    instances: Arc<Mutex<HashMap<Key, InstanceObservation>>>,
    vm_snapshots: Arc<Mutex<HashMap<Key, (VirtualMachineSnapshot, SnapshotObservation)>>>,
    vm_restores: Arc<Mutex<HashMap<Key, (VirtualMachineRestore, RestoreObservation)>>>,
    calls: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, MockFailure>>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("calls", &lock(&self.calls).len())
            .finish_non_exhaustive()
    }
}

impl MockClusterClient {
    /// Create a new, empty mock client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Test setup

    /// Marks a CRD as installed
    pub fn install_crd(&self, name: &str) {
        lock(&self.crds).insert(name.to_string());
    }

    /// Stores a Wukong so status and finalizer writes can be observed
    pub fn add_wukong(&self, wukong: Wukong) {
        let k = key(
            wukong.metadata.namespace.as_deref().unwrap_or_default(),
            wukong.metadata.name.as_deref().unwrap_or_default(),
        );
        lock(&self.wukongs).insert(k, wukong);
    }

    /// Stores a WukongSnapshot
    pub fn add_wukong_snapshot(&self, snapshot: WukongSnapshot) {
        let k = key(
            snapshot.metadata.namespace.as_deref().unwrap_or_default(),
            snapshot.metadata.name.as_deref().unwrap_or_default(),
        );
        lock(&self.wukong_snapshots).insert(k, snapshot);
    }

    /// Adds a StorageClass
    pub fn add_storage_class(&self, name: &str, info: StorageClassInfo) {
        lock(&self.storage_classes).insert(name.to_string(), info);
    }

    /// Adds a Secret
    pub fn add_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
        lock(&self.secrets).insert(key(namespace, name), data);
    }

    /// Adds a node network policy declared by someone else
    pub fn add_node_network_policy(&self, policy: NodeNetworkPolicy) {
        lock(&self.policies).insert(policy.name.clone(), policy);
    }

    /// Reports the IPv4 state of a host interface
    pub fn set_node_interface(&self, interface: &str, ipv4: NodeInterfaceIpv4) {
        lock(&self.node_interfaces).insert(interface.to_string(), ipv4);
    }

    /// Adds an existing claim, optionally owned by another object
    pub fn add_claim(&self, namespace: &str, name: &str, claim: ClaimObservation) {
        lock(&self.claims).insert(key(namespace, name), claim);
    }

    /// Moves a claim to `phase`, reporting `capacity` once bound
    pub fn set_claim_phase(&self, namespace: &str, name: &str, phase: ClaimPhase) {
        if let Some(claim) = lock(&self.claims).get_mut(&key(namespace, name)) {
            claim.phase = phase;
            if phase == ClaimPhase::Bound && claim.capacity.is_none() {
                claim.capacity.clone_from(&claim.requested);
            }
        }
    }

    /// Moves a DataVolume to `phase`
    pub fn set_data_volume_phase(&self, namespace: &str, name: &str, phase: DataVolumePhase) {
        if let Some((_, observed)) = lock(&self.data_volumes).get_mut(&key(namespace, name)) {
            observed.phase = phase;
        }
    }

    /// Creates or replaces the running instance of a VM
    pub fn set_instance(&self, namespace: &str, name: &str, instance: InstanceObservation) {
        lock(&self.instances).insert(key(namespace, name), instance);
    }

    /// Removes the running instance of a VM
    pub fn remove_instance(&self, namespace: &str, name: &str) {
        lock(&self.instances).remove(&key(namespace, name));
    }

    /// Sets the observed state of a VM snapshot
    pub fn set_snapshot_state(&self, namespace: &str, name: &str, observed: SnapshotObservation) {
        if let Some((_, state)) = lock(&self.vm_snapshots).get_mut(&key(namespace, name)) {
            *state = observed;
        }
    }

    /// Marks a VM restore complete
    pub fn complete_restore(&self, namespace: &str, name: &str) {
        if let Some((_, state)) = lock(&self.vm_restores).get_mut(&key(namespace, name)) {
            state.complete = true;
        }
    }

    /// Makes the next call of `operation` fail
    pub fn fail_next(&self, operation: &str, failure: MockFailure) {
        lock(&self.failures).insert(operation.to_string(), failure);
    }

    // Inspection

    /// Mutating calls in the order they were made, as `"operation name"`
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls of `operation`
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    /// Forgets recorded calls
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Stored Wukong, including status and finalizer writes
    #[must_use]
    pub fn wukong(&self, namespace: &str, name: &str) -> Option<Wukong> {
        lock(&self.wukongs).get(&key(namespace, name)).cloned()
    }

    /// Stored WukongSnapshot
    #[must_use]
    pub fn wukong_snapshot(&self, namespace: &str, name: &str) -> Option<WukongSnapshot> {
        lock(&self.wukong_snapshots).get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn attachment(&self, namespace: &str, name: &str) -> Option<NetworkAttachment> {
        lock(&self.attachments).get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn policy(&self, name: &str) -> Option<nmstate::DesiredState> {
        lock(&self.policies).get(name).map(|p| p.desired_state.clone())
    }

    #[must_use]
    pub fn policy_owner(&self, name: &str) -> Option<PolicyOwner> {
        lock(&self.policies).get(name).and_then(|p| p.owner.clone())
    }

    #[must_use]
    pub fn data_volume(&self, namespace: &str, name: &str) -> Option<DataVolume> {
        lock(&self.data_volumes)
            .get(&key(namespace, name))
            .map(|(dv, _)| dv.clone())
    }

    #[must_use]
    pub fn claim(&self, namespace: &str, name: &str) -> Option<ClaimObservation> {
        lock(&self.claims).get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn virtual_machine(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        lock(&self.vms).get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn vm_snapshot(&self, namespace: &str, name: &str) -> Option<VirtualMachineSnapshot> {
        lock(&self.vm_snapshots)
            .get(&key(namespace, name))
            .map(|(s, _)| s.clone())
    }

    #[must_use]
    pub fn vm_restore(&self, namespace: &str, name: &str) -> Option<VirtualMachineRestore> {
        lock(&self.vm_restores)
            .get(&key(namespace, name))
            .map(|(r, _)| r.clone())
    }

    fn record(&self, operation: &str, target: &str) -> Result<(), ClusterError> {
        if let Some(failure) = lock(&self.failures).remove(operation) {
            return Err(failure.into_error(operation));
        }
        lock(&self.calls).push(format!("{operation} {target}"));
        Ok(())
    }

    fn check(&self, operation: &str) -> Result<(), ClusterError> {
        match lock(&self.failures).remove(operation) {
            Some(failure) => Err(failure.into_error(operation)),
            None => Ok(()),
        }
    }
}

fn requested_claim(template: &ClaimTemplate, owner: Option<ObservedOwner>) -> ClaimObservation {
    ClaimObservation {
        phase: ClaimPhase::Pending,
        storage_class_name: Some(template.storage_class_name.clone()),
        requested: Some(template.size().to_string()),
        capacity: None,
        owners: owner.into_iter().collect(),
    }
}

fn observed_owner(owner: Option<&OwnerRef>) -> Option<ObservedOwner> {
    owner.map(|o| ObservedOwner {
        kind: o.kind.clone(),
        name: o.name.clone(),
        uid: o.uid.clone(),
    })
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_wukong(&self, namespace: &str, name: &str) -> Result<Option<Wukong>, ClusterError> {
        self.check("get_wukong")?;
        Ok(self.wukong(namespace, name))
    }

    async fn set_wukong_finalizers(
        &self,
        namespace: &str,
        name: &str,
        _resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        self.record("set_wukong_finalizers", name)?;
        if let Some(wukong) = lock(&self.wukongs).get_mut(&key(namespace, name)) {
            wukong.metadata.finalizers = Some(finalizers.to_vec());
        }
        Ok(())
    }

    async fn patch_wukong_status(
        &self,
        namespace: &str,
        name: &str,
        _resource_version: Option<&str>,
        status: &WukongStatus,
    ) -> Result<(), ClusterError> {
        self.record("patch_wukong_status", name)?;
        if let Some(wukong) = lock(&self.wukongs).get_mut(&key(namespace, name)) {
            wukong.status = Some(status.clone());
        }
        Ok(())
    }

    async fn get_wukong_snapshot(&self, namespace: &str, name: &str) -> Result<Option<WukongSnapshot>, ClusterError> {
        self.check("get_wukong_snapshot")?;
        Ok(self.wukong_snapshot(namespace, name))
    }

    async fn patch_wukong_snapshot_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WukongSnapshotStatus,
    ) -> Result<(), ClusterError> {
        self.record("patch_wukong_snapshot_status", name)?;
        if let Some(snapshot) = lock(&self.wukong_snapshots).get_mut(&key(namespace, name)) {
            snapshot.status = Some(status.clone());
        }
        Ok(())
    }

    async fn crd_exists(&self, name: &str) -> Result<bool, ClusterError> {
        self.check("crd_exists")?;
        Ok(lock(&self.crds).contains(name))
    }

    async fn network_attachment_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.check("network_attachment_exists")?;
        Ok(lock(&self.attachments).contains_key(&key(namespace, name)))
    }

    async fn create_network_attachment(&self, attachment: &NetworkAttachment) -> Result<(), ClusterError> {
        self.record("create_network_attachment", &attachment.key.name)?;
        lock(&self.attachments).insert(
            key(&attachment.key.namespace, &attachment.key.name),
            attachment.clone(),
        );
        Ok(())
    }

    async fn get_node_network_policy(&self, name: &str) -> Result<Option<NodeNetworkPolicy>, ClusterError> {
        self.check("get_node_network_policy")?;
        Ok(lock(&self.policies).get(name).cloned())
    }

    async fn create_node_network_policy(&self, policy: &NodeNetworkPolicy) -> Result<(), ClusterError> {
        self.record("create_node_network_policy", &policy.name)?;
        lock(&self.policies).insert(policy.name.clone(), policy.clone());
        Ok(())
    }

    async fn update_node_network_policy(&self, policy: &NodeNetworkPolicy) -> Result<(), ClusterError> {
        self.record("update_node_network_policy", &policy.name)?;
        lock(&self.policies).insert(policy.name.clone(), policy.clone());
        Ok(())
    }

    async fn delete_node_network_policy(&self, name: &str) -> Result<(), ClusterError> {
        self.record("delete_node_network_policy", name)?;
        lock(&self.policies).remove(name);
        Ok(())
    }

    async fn find_node_interface_ipv4(&self, interface: &str) -> Result<Option<NodeInterfaceIpv4>, ClusterError> {
        self.check("find_node_interface_ipv4")?;
        Ok(lock(&self.node_interfaces).get(interface).cloned())
    }

    async fn get_data_volume(&self, namespace: &str, name: &str) -> Result<Option<DataVolumeObservation>, ClusterError> {
        self.check("get_data_volume")?;
        Ok(lock(&self.data_volumes)
            .get(&key(namespace, name))
            .map(|(_, observed)| observed.clone()))
    }

    async fn create_data_volume(&self, data_volume: &DataVolume) -> Result<(), ClusterError> {
        self.record("create_data_volume", &data_volume.key.name)?;
        let k = key(&data_volume.key.namespace, &data_volume.key.name);
        // CDI creates a claim of the same name owned by the DataVolume.
        let owner = ObservedOwner {
            kind: "DataVolume".to_string(),
            name: data_volume.key.name.clone(),
            uid: format!("dv-{}", data_volume.key.name),
        };
        lock(&self.claims).insert(k.clone(), requested_claim(&data_volume.spec.pvc, Some(owner)));
        lock(&self.data_volumes).insert(
            k,
            (
                data_volume.clone(),
                DataVolumeObservation {
                    phase: DataVolumePhase::Unknown,
                    progress: None,
                },
            ),
        );
        Ok(())
    }

    async fn delete_data_volume(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record("delete_data_volume", name)?;
        let k = key(namespace, name);
        if lock(&self.data_volumes).remove(&k).is_some() {
            // Garbage collection of the owned claim.
            lock(&self.claims).remove(&k);
        }
        Ok(())
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<ClaimObservation>, ClusterError> {
        self.check("get_claim")?;
        Ok(self.claim(namespace, name))
    }

    async fn create_claim(&self, claim: &ClaimRequest) -> Result<(), ClusterError> {
        self.record("create_claim", &claim.key.name)?;
        let owner = observed_owner(claim.key.owner.as_ref());
        lock(&self.claims).insert(
            key(&claim.key.namespace, &claim.key.name),
            requested_claim(&claim.template, owner),
        );
        Ok(())
    }

    async fn expand_claim(&self, namespace: &str, name: &str, size: &str) -> Result<(), ClusterError> {
        self.record("expand_claim", name)?;
        match lock(&self.claims).get_mut(&key(namespace, name)) {
            Some(claim) => {
                claim.requested = Some(size.to_string());
                Ok(())
            }
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record("delete_claim", name)?;
        lock(&self.claims).remove(&key(namespace, name));
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClassInfo>, ClusterError> {
        self.check("get_storage_class")?;
        Ok(lock(&self.storage_classes).get(name).cloned())
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ClusterError> {
        self.check("get_secret_data")?;
        Ok(lock(&self.secrets).get(&key(namespace, name)).cloned())
    }

    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachineObservation>, ClusterError> {
        self.check("get_virtual_machine")?;
        let Some(vm) = self.virtual_machine(namespace, name) else {
            return Ok(None);
        };
        Ok(Some(VirtualMachineObservation {
            resource_version: Some("1".to_string()),
            spec: serde_json::to_value(&vm.spec)?,
        }))
    }

    async fn create_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ClusterError> {
        self.record("create_virtual_machine", &vm.key.name)?;
        lock(&self.vms).insert(key(&vm.key.namespace, &vm.key.name), vm.clone());
        Ok(())
    }

    async fn update_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ClusterError> {
        self.record("update_virtual_machine", &vm.key.name)?;
        lock(&self.vms).insert(key(&vm.key.namespace, &vm.key.name), vm.clone());
        Ok(())
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record("delete_virtual_machine", name)?;
        lock(&self.vms).remove(&key(namespace, name));
        Ok(())
    }

    async fn get_virtual_machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstanceObservation>, ClusterError> {
        self.check("get_virtual_machine_instance")?;
        Ok(lock(&self.instances).get(&key(namespace, name)).cloned())
    }

    async fn get_vm_snapshot(&self, namespace: &str, name: &str) -> Result<Option<SnapshotObservation>, ClusterError> {
        self.check("get_vm_snapshot")?;
        Ok(lock(&self.vm_snapshots)
            .get(&key(namespace, name))
            .map(|(_, observed)| observed.clone()))
    }

    async fn create_vm_snapshot(&self, snapshot: &VirtualMachineSnapshot) -> Result<(), ClusterError> {
        self.record("create_vm_snapshot", &snapshot.key.name)?;
        lock(&self.vm_snapshots).insert(
            key(&snapshot.key.namespace, &snapshot.key.name),
            (snapshot.clone(), SnapshotObservation::default()),
        );
        Ok(())
    }

    async fn get_vm_restore(&self, namespace: &str, name: &str) -> Result<Option<RestoreObservation>, ClusterError> {
        self.check("get_vm_restore")?;
        Ok(lock(&self.vm_restores)
            .get(&key(namespace, name))
            .map(|(_, observed)| observed.clone()))
    }

    async fn create_vm_restore(&self, restore: &VirtualMachineRestore) -> Result<(), ClusterError> {
        self.record("create_vm_restore", &restore.key.name)?;
        lock(&self.vm_restores).insert(
            key(&restore.key.namespace, &restore.key.name),
            (restore.clone(), RestoreObservation::default()),
        );
        Ok(())
    }
}
