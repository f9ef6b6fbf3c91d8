//! Wukong CRD
//!
//! Declares a virtual machine: compute, disks, secondary networks,
//! scheduling policy and guest provisioning. The controller converges
//! the cluster towards this declaration and reports what it observed
//! in the status sub-resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer the controller keeps on every `Wukong` until teardown is confirmed.
pub const WUKONG_FINALIZER: &str = "wukong.novasphere.dev/finalizer";

/// Name of the implicit pod network.
pub const DEFAULT_NETWORK_NAME: &str = "default";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vm.novasphere.dev",
    version = "v1alpha1",
    kind = "Wukong",
    namespaced,
    status = "WukongStatus",
    shortname = "wk",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"VM","type":"string","jsonPath":".status.vmName"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".status.nodeName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WukongSpec {
    /// Number of virtual CPU cores (1-64)
    pub cpu: i32,

    /// Guest memory as a Kubernetes quantity ("4Gi", "2048Mi")
    pub memory: String,

    /// Base OS image. Only used to decide whether guest configuration is emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_image: Option<String>,

    /// Secret holding SSH public keys for the guest user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_secret: Option<String>,

    /// Guest user provisioned through cloud-init
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_user: Option<CloudInitUser>,

    /// Ordered network interfaces
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,

    /// Ordered disks. The first disk flagged `boot` gets boot order 1.
    #[serde(default)]
    pub disks: Vec<DiskConfig>,

    /// Scheduling constraints. Absent means no implicit constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_availability: Option<HighAvailability>,

    /// Start behaviour of the virtual machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_strategy: Option<StartStrategy>,

    /// Host devices passed through to the guest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<GpuDevice>,

    /// Name of a `WukongSnapshot` in the same namespace to restore from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_from_snapshot: Option<String>,
}

impl WukongSpec {
    /// Whether the guest should be started without user intervention.
    #[must_use]
    pub fn auto_start(&self) -> bool {
        self.start_strategy.as_ref().is_none_or(|s| s.auto_start)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitUser {
    /// Login name
    pub name: String,

    /// Plaintext password. Accepted, but not every image honours it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Crypt-style password hash. Preferred over `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Sudo rule, defaults to passwordless sudo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sudo: Option<String>,

    /// Login shell, defaults to `/bin/bash`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Supplementary groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Lock the password for console login
    #[serde(default)]
    pub lock_passwd: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Interface name, unique within the instance. `default` is the pod network.
    pub name: String,

    /// Attachment type. Required for every network except `default`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub network_type: Option<NetworkType>,

    /// Existing NetworkAttachmentDefinition to use instead of a generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nad_name: Option<String>,

    /// VLAN tag (1-4094)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,

    /// Host bridge name, defaults to `br-<network>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_name: Option<String>,

    /// Use this network as the guest's primary interface instead of the pod network
    #[serde(default)]
    pub primary: bool,

    /// Host NIC enslaved to the bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_interface: Option<String>,

    /// Static IPv4 (CIDR) the node bridge takes over from the NIC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_address: Option<String>,

    /// Guest-side addressing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_config: Option<IpConfig>,
}

impl NetworkConfig {
    /// Whether this is the implicit pod network.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_NETWORK_NAME
    }

    /// Host bridge this network is carried on.
    #[must_use]
    pub fn bridge(&self) -> String {
        self.bridge_name
            .clone()
            .unwrap_or_else(|| format!("br-{}", self.name))
    }
}

/// Secondary network attachment type
///
/// Serializes lowercase to match CNI plugin naming.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Linux bridge
    Bridge,
    /// MAC-VLAN
    Macvlan,
    /// SR-IOV virtual function
    Sriov,
    /// Open vSwitch
    Ovs,
}

impl NetworkType {
    /// Whether KubeVirt can attach this type as a bridged secondary interface.
    #[must_use]
    pub fn supports_secondary(self) -> bool {
        matches!(self, Self::Bridge | Self::Ovs)
    }

    /// Whether a host-level bridge has to be declared for this type.
    #[must_use]
    pub fn needs_node_bridge(self) -> bool {
        matches!(self, Self::Bridge | Self::Ovs)
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bridge => "bridge",
            Self::Macvlan => "macvlan",
            Self::Sriov => "sriov",
            Self::Ovs => "ovs",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpConfig {
    /// Addressing mode
    pub mode: IpMode,

    /// CIDR address, required for static mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Default gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// DNS resolvers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IpMode {
    /// Fixed address
    Static,
    /// Address leased from DHCP
    #[default]
    Dhcp,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfig {
    /// Disk name, unique within the instance
    pub name: String,

    /// Requested size. May grow across updates, never shrink.
    pub size: String,

    /// Storage class of the backing claim
    #[serde(default)]
    pub storage_class_name: String,

    /// Boot from this disk
    #[serde(default)]
    pub boot: bool,

    /// Image imported into the disk (`http(s)://` or a registry reference)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HighAvailability {
    /// Restart behaviour when no explicit run strategy is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,

    /// Node labels the guest must be scheduled on
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Taints the guest tolerates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Always restart
    #[serde(alias = "always")]
    Always,
    /// Restart on guest failure only
    #[serde(alias = "onFailure")]
    OnFailure,
    /// Never restart
    #[serde(alias = "never")]
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartStrategy {
    /// Explicit KubeVirt run strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<RunStrategy>,

    /// Start the guest automatically
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl Default for StartStrategy {
    fn default() -> Self {
        Self {
            run_strategy: None,
            auto_start: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// KubeVirt `spec.runStrategy`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RunStrategy {
    /// Keep the guest running
    Always,
    /// Restart the guest only after a failure
    RerunOnFailure,
    /// Started and stopped by the user
    Manual,
    /// Keep the guest stopped
    Halted,
    /// Run once, never restart
    Once,
}

impl RunStrategy {
    /// Wire value expected by KubeVirt.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::RerunOnFailure => "RerunOnFailure",
            Self::Manual => "Manual",
            Self::Halted => "Halted",
            Self::Once => "Once",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    /// Device name inside the guest spec
    pub name: String,
    /// Resource name advertised by the device plugin (`nvidia.com/GA102GL_A10`)
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WukongStatus {
    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<WukongPhase>,

    /// Human readable reason for the current phase, set on errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Name of the KubeVirt VirtualMachine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,

    /// Node the guest runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// CPU count last applied to the VirtualMachine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_cpu: Option<i32>,

    /// Snapshot the instance was restored from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub networks: Vec<NetworkStatus>,

    #[serde(default)]
    pub volumes: Vec<VolumeStatus>,
}

impl WukongStatus {
    /// Looks up a condition by type.
    #[must_use]
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == condition_type)
    }
}

/// Wukong lifecycle phase
///
/// Serializes as PascalCase but also accepts lowercase values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum WukongPhase {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "creating")]
    Creating,
    #[serde(alias = "running")]
    Running,
    #[serde(alias = "stopped")]
    Stopped,
    #[serde(alias = "error")]
    Error,
}

impl std::fmt::Display for WukongPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Declared network name
    pub name: String,

    /// Attachment used for this network, empty for the pod network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nad_name: Option<String>,

    /// Interface name as seen by the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    /// Declared disk name
    pub name: String,

    /// Backing PersistentVolumeClaim
    pub pvc_name: String,

    /// Claim is bound to a volume
    #[serde(default)]
    pub bound: bool,

    /// Claim is bound, or waits for its first consumer and can be scheduled
    #[serde(default)]
    pub schedulable: bool,

    /// Capacity reported by the claim, else the requested size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Size from the last accepted spec. Later specs may not go below it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_size: Option<String>,
}
