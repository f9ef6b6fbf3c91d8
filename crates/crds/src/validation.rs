//! Wukong spec validation
//!
//! `validate_spec` holds the static rules a spec must satisfy before the
//! controller touches any dependent object. `validate_update` holds the
//! monotonic rules checked against what the controller already applied.

use crate::quantity::Quantity;
use crate::wukong::{IpMode, WukongSpec, WukongStatus};
use ipnetwork::Ipv4Network;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Smallest accepted vCPU count
pub const MIN_CPU: i32 = 1;
/// Largest accepted vCPU count
pub const MAX_CPU: i32 = 64;

/// Reasons a spec or an update is refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cpu must be between {MIN_CPU} and {MAX_CPU}, got {0}")]
    CpuOutOfRange(i32),

    #[error("memory is required")]
    MissingMemory,

    #[error("at least one disk is required")]
    NoDisks,

    #[error("disk {index}: {field} is required")]
    DiskFieldMissing { index: usize, field: &'static str },

    #[error("{kind} name {name:?} is not a valid DNS label")]
    InvalidName { kind: &'static str, name: String },

    #[error("{kind} name {name:?} is declared more than once")]
    DuplicateName { kind: &'static str, name: String },

    #[error("disk {disk}: {source}")]
    InvalidSize {
        disk: String,
        #[source]
        source: crate::quantity::QuantityError,
    },

    #[error("network {0}: type is required")]
    MissingNetworkType(String),

    #[error("network {network}: vlanId must be between 1 and 4094, got {vlan}")]
    VlanOutOfRange { network: String, vlan: u16 },

    #[error("network default cannot reference an attachment")]
    DefaultNetworkAttachment,

    #[error("at most one network may be primary, found {0}")]
    MultiplePrimary(usize),

    #[error("network {network}: {reason}")]
    InvalidIpConfig { network: String, reason: String },

    #[error("cloudInitUser.name is required")]
    MissingUserName,

    #[error("cpu cannot be reduced from {applied} to {requested}")]
    CpuReduced { applied: i32, requested: i32 },

    #[error("disk {0} cannot be removed")]
    DiskRemoved(String),

    #[error("disk {disk} cannot shrink from {from} to {to}")]
    DiskShrunk { disk: String, from: String, to: String },
}

/// Checks the rules every spec must satisfy on its own.
///
/// # Errors
///
/// Returns the first rule violated, in declaration order.
pub fn validate_spec(spec: &WukongSpec) -> Result<(), ValidationError> {
    if !(MIN_CPU..=MAX_CPU).contains(&spec.cpu) {
        return Err(ValidationError::CpuOutOfRange(spec.cpu));
    }
    if spec.memory.trim().is_empty() {
        return Err(ValidationError::MissingMemory);
    }
    if spec.disks.is_empty() {
        return Err(ValidationError::NoDisks);
    }

    let mut disk_names = HashSet::new();
    for (index, disk) in spec.disks.iter().enumerate() {
        if disk.name.is_empty() {
            return Err(ValidationError::DiskFieldMissing { index, field: "name" });
        }
        if disk.size.is_empty() {
            return Err(ValidationError::DiskFieldMissing { index, field: "size" });
        }
        if disk.storage_class_name.is_empty() {
            return Err(ValidationError::DiskFieldMissing {
                index,
                field: "storageClassName",
            });
        }
        check_label("disk", &disk.name)?;
        if !disk_names.insert(disk.name.as_str()) {
            return Err(ValidationError::DuplicateName {
                kind: "disk",
                name: disk.name.clone(),
            });
        }
        Quantity::parse(&disk.size).map_err(|source| ValidationError::InvalidSize {
            disk: disk.name.clone(),
            source,
        })?;
    }

    let mut network_names = HashSet::new();
    for network in &spec.networks {
        check_label("network", &network.name)?;
        if !network_names.insert(network.name.as_str()) {
            return Err(ValidationError::DuplicateName {
                kind: "network",
                name: network.name.clone(),
            });
        }
        if network.is_default() {
            if network.nad_name.is_some() {
                return Err(ValidationError::DefaultNetworkAttachment);
            }
            continue;
        }
        if network.network_type.is_none() {
            return Err(ValidationError::MissingNetworkType(network.name.clone()));
        }
        if let Some(vlan) = network.vlan_id {
            if !(1..=4094).contains(&vlan) {
                return Err(ValidationError::VlanOutOfRange {
                    network: network.name.clone(),
                    vlan,
                });
            }
        }
        if let Some(address) = &network.node_address {
            address.parse::<Ipv4Network>().map_err(|e| ValidationError::InvalidIpConfig {
                network: network.name.clone(),
                reason: format!("nodeAddress {address}: {e}"),
            })?;
        }
        if let Some(ip) = &network.ip_config {
            if ip.mode == IpMode::Static {
                let invalid = |reason: String| ValidationError::InvalidIpConfig {
                    network: network.name.clone(),
                    reason,
                };
                let address = ip
                    .address
                    .as_deref()
                    .ok_or_else(|| invalid("static mode requires an address".to_string()))?;
                if !address.contains('/') {
                    return Err(invalid(format!("address {address} must be in CIDR form")));
                }
                address
                    .parse::<Ipv4Network>()
                    .map_err(|e| invalid(format!("address {address}: {e}")))?;
                let gateway = ip
                    .gateway
                    .as_deref()
                    .ok_or_else(|| invalid("static mode requires a gateway".to_string()))?;
                gateway
                    .parse::<Ipv4Addr>()
                    .map_err(|e| invalid(format!("gateway {gateway}: {e}")))?;
            }
        }
    }

    let primaries = spec.networks.iter().filter(|n| n.primary).count();
    if primaries > 1 {
        return Err(ValidationError::MultiplePrimary(primaries));
    }

    if let Some(user) = &spec.cloud_init_user {
        if user.name.trim().is_empty() {
            return Err(ValidationError::MissingUserName);
        }
    }

    Ok(())
}

/// Checks a spec against what the controller recorded as applied.
///
/// CPU and disk sizes only grow and disks are never removed. An empty
/// status accepts any spec.
///
/// # Errors
///
/// Returns the first monotonicity rule violated.
pub fn validate_update(spec: &WukongSpec, status: &WukongStatus) -> Result<(), ValidationError> {
    if let Some(applied) = status.applied_cpu {
        if spec.cpu < applied {
            return Err(ValidationError::CpuReduced {
                applied,
                requested: spec.cpu,
            });
        }
    }

    for volume in &status.volumes {
        let Some(disk) = spec.disks.iter().find(|d| d.name == volume.name) else {
            return Err(ValidationError::DiskRemoved(volume.name.clone()));
        };
        let Some(previous) = volume.requested_size.as_deref() else {
            continue;
        };
        // Unparseable history cannot be compared; the new size was checked by validate_spec.
        let (Ok(before), Ok(after)) = (Quantity::parse(previous), Quantity::parse(&disk.size)) else {
            continue;
        };
        if after < before {
            return Err(ValidationError::DiskShrunk {
                disk: disk.name.clone(),
                from: previous.to_string(),
                to: disk.size.clone(),
            });
        }
    }

    Ok(())
}

/// RFC 1123 label: lowercase alphanumerics and '-', 63 chars max.
fn check_label(kind: &'static str, name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}
