//! Multus NetworkAttachmentDefinition and its CNI configuration

use super::meta::ObjectKey;
use serde::Serialize;

/// CNI spec version written into every generated configuration.
pub const CNI_VERSION: &str = "0.3.1";

/// A NetworkAttachmentDefinition (`k8s.cni.cncf.io/v1`).
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkAttachment {
    pub key: ObjectKey,
    pub config: CniConfig,
}

/// Bridge plugin configuration. Stored in the attachment as a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CniConfig {
    pub cni_version: String,
    #[serde(rename = "type")]
    pub plugin: String,
    pub bridge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipam: Option<Ipam>,
}

impl CniConfig {
    /// Linux bridge plugin on `bridge`.
    pub fn bridge(bridge: impl Into<String>) -> Self {
        Self {
            cni_version: CNI_VERSION.to_string(),
            plugin: "bridge".to_string(),
            bridge: bridge.into(),
            vlan: None,
            ipam: None,
        }
    }

    /// Renders the document placed in `spec.config`.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails, which a well-formed value never does.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// IPAM block of a CNI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Ipam {
    /// Lease from the CNI DHCP daemon
    #[serde(rename = "dhcp")]
    Dhcp {},
    /// Fixed single address handed out by host-local
    #[serde(rename = "host-local", rename_all = "camelCase")]
    HostLocal {
        subnet: String,
        range_start: String,
        range_end: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        routes: Vec<Route>,
    },
}

/// Static route in an IPAM block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub dst: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}
