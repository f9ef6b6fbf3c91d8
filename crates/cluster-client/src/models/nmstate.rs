//! NMState NodeNetworkConfigurationPolicy documents

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespace of the Wukong a policy was declared for.
pub const OWNER_NAMESPACE_LABEL: &str = "vm.novasphere.dev/owner-namespace";
/// Name of the Wukong a policy was declared for.
pub const OWNER_NAME_LABEL: &str = "vm.novasphere.dev/owner-name";

/// A cluster-scoped NodeNetworkConfigurationPolicy (`nmstate.io/v1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNetworkPolicy {
    pub name: String,
    /// Owning Wukong. Cluster-scoped objects cannot carry an owner
    /// reference to a namespaced one, so it travels as labels.
    pub owner: Option<PolicyOwner>,
    pub desired_state: DesiredState,
}

/// Namespace and name of the Wukong behind a node network policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOwner {
    pub namespace: String,
    pub name: String,
}

impl PolicyOwner {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (OWNER_NAMESPACE_LABEL.to_string(), self.namespace.clone()),
            (OWNER_NAME_LABEL.to_string(), self.name.clone()),
        ])
    }

    /// Reads the owner back, `None` unless both labels are present.
    #[must_use]
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            namespace: labels.get(OWNER_NAMESPACE_LABEL)?.clone(),
            name: labels.get(OWNER_NAME_LABEL)?.clone(),
        })
    }
}

impl std::fmt::Display for PolicyOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DesiredState {
    pub interfaces: Vec<Interface>,
}

impl DesiredState {
    #[must_use]
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InterfaceKind,
    pub state: InterfaceState,
    pub ipv4: Ipv4,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<Bridge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceKind {
    LinuxBridge,
    Ethernet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    Up,
    Down,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ipv4 {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Ipv4Address>,
}

impl Ipv4 {
    /// Addressing turned off.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Address leased over DHCP.
    #[must_use]
    pub fn dhcp() -> Self {
        Self {
            enabled: true,
            dhcp: Some(true),
            address: Vec::new(),
        }
    }

    /// Fixed addresses.
    #[must_use]
    pub fn fixed(address: Vec<Ipv4Address>) -> Self {
        Self {
            enabled: true,
            dhcp: Some(false),
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Address {
    pub ip: String,
    #[serde(rename = "prefix-length")]
    pub prefix_length: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    pub options: BridgeOptions,
    pub port: Vec<BridgePort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BridgeOptions {
    pub stp: Stp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Stp {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgePort {
    pub name: String,
}

/// IPv4 state of a host interface as reported by NodeNetworkState.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeInterfaceIpv4 {
    pub node: String,
    pub dhcp: bool,
    pub addresses: Vec<Ipv4Address>,
}
