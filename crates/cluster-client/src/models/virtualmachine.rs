//! KubeVirt VirtualMachine and VirtualMachineInstance documents
//!
//! Only the subset of the KubeVirt schema the controller writes is
//! modelled. Anything KubeVirt defaults server-side is left out.

use super::meta::ObjectKey;
use k8s_openapi::api::core::v1::Toleration;
use serde::Serialize;
use std::collections::BTreeMap;

/// Virtio, the fastest paravirtualised bus.
pub const DISK_BUS: &str = "virtio";

/// A VirtualMachine (`kubevirt.io/v1`).
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachine {
    pub key: ObjectKey,
    pub labels: BTreeMap<String, String>,
    pub spec: VirtualMachineSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    pub run_strategy: String,
    pub template: InstanceTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceTemplate {
    pub metadata: TemplateMetadata,
    pub spec: InstanceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct TemplateMetadata {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub domain: Domain,
    pub networks: Vec<Network>,
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Domain {
    pub cpu: Cpu,
    pub memory: Memory,
    pub devices: Devices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cpu {
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Memory {
    pub guest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Devices {
    pub disks: Vec<Disk>,
    pub interfaces: Vec<Interface>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<Gpu>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub disk: DiskTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskTarget {
    pub bus: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    #[serde(flatten)]
    pub binding: InterfaceBinding,
}

/// How the guest NIC is wired to the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InterfaceBinding {
    Masquerade {},
    Bridge {},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    pub name: String,
    #[serde(flatten)]
    pub source: NetworkSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkSource {
    Pod {},
    Multus(MultusNetwork),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    pub network_name: String,
    /// Replaces the pod network as the primary interface
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    #[serde(rename_all = "camelCase")]
    PersistentVolumeClaim { claim_name: String },
    DataVolume { name: String },
    #[serde(rename_all = "camelCase")]
    CloudInitNoCloud { user_data_base64: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gpu {
    pub name: String,
    pub device_name: String,
}

/// What the controller needs from an existing VirtualMachine.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineObservation {
    pub resource_version: Option<String>,
    pub spec: serde_json::Value,
}

/// Runtime facts from a VirtualMachineInstance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceObservation {
    pub phase: Option<String>,
    pub node_name: Option<String>,
    pub interfaces: Vec<InstanceInterface>,
}

/// One entry of `VirtualMachineInstance.status.interfaces`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceInterface {
    /// Network name from the VM spec
    pub name: Option<String>,
    pub mac: Option<String>,
    pub ip_address: Option<String>,
    /// Interface name inside the guest, reported by the guest agent
    pub interface_name: Option<String>,
}
