//! API coordinates of the third-party kinds the controller manipulates.
//!
//! None of these have Rust types in `k8s-openapi`, so they are accessed as
//! `DynamicObject`s through an [`ApiResource`].

use kube::api::ApiResource;
use kube::core::GroupVersionKind;

fn resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

/// `k8s.cni.cncf.io/v1` NetworkAttachmentDefinition
#[must_use]
pub fn network_attachment_definition() -> ApiResource {
    resource("k8s.cni.cncf.io", "v1", "NetworkAttachmentDefinition", "network-attachment-definitions")
}

/// `nmstate.io/v1` NodeNetworkConfigurationPolicy (cluster scoped)
#[must_use]
pub fn node_network_configuration_policy() -> ApiResource {
    resource("nmstate.io", "v1", "NodeNetworkConfigurationPolicy", "nodenetworkconfigurationpolicies")
}

/// `nmstate.io/v1beta1` NodeNetworkState (cluster scoped, read only)
#[must_use]
pub fn node_network_state() -> ApiResource {
    resource("nmstate.io", "v1beta1", "NodeNetworkState", "nodenetworkstates")
}

/// `cdi.kubevirt.io/v1beta1` DataVolume
#[must_use]
pub fn data_volume() -> ApiResource {
    resource("cdi.kubevirt.io", "v1beta1", "DataVolume", "datavolumes")
}

/// `kubevirt.io/v1` VirtualMachine
#[must_use]
pub fn virtual_machine() -> ApiResource {
    resource("kubevirt.io", "v1", "VirtualMachine", "virtualmachines")
}

/// `kubevirt.io/v1` VirtualMachineInstance
#[must_use]
pub fn virtual_machine_instance() -> ApiResource {
    resource("kubevirt.io", "v1", "VirtualMachineInstance", "virtualmachineinstances")
}

/// `snapshot.kubevirt.io/v1beta1` VirtualMachineSnapshot
#[must_use]
pub fn virtual_machine_snapshot() -> ApiResource {
    resource("snapshot.kubevirt.io", "v1beta1", "VirtualMachineSnapshot", "virtualmachinesnapshots")
}

/// `snapshot.kubevirt.io/v1beta1` VirtualMachineRestore
#[must_use]
pub fn virtual_machine_restore() -> ApiResource {
    resource("snapshot.kubevirt.io", "v1beta1", "VirtualMachineRestore", "virtualmachinerestores")
}

/// CRD whose presence means Multus is installed.
pub const MULTUS_CRD: &str = "network-attachment-definitions.k8s.cni.cncf.io";

/// CRD whose presence means kubernetes-nmstate is installed.
pub const NMSTATE_CRD: &str = "nodenetworkconfigurationpolicies.nmstate.io";
