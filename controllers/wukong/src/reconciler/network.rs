//! Network synthesizer
//!
//! Resolves every declared network to an attachment. Bridged networks also
//! get a node network policy that builds the host bridge the attachment
//! plugs into, declared before the attachment itself.

use super::Reconciler;
use super::names;
use crate::error::ControllerError;
use crate::reconcile_helpers::{object_ref, owner_ref};
use cluster_client::models::nmstate::{
    Bridge, BridgeOptions, BridgePort, DesiredState, Interface, InterfaceKind, InterfaceState, Ipv4, Ipv4Address,
};
use cluster_client::{
    CniConfig, Ipam, NetworkAttachment, NodeNetworkPolicy, ObjectKey, OwnerRef, PolicyOwner, Route, kinds,
};
use crds::{IpMode, NetworkConfig, NetworkStatus, Wukong};
use ipnetwork::Ipv4Network;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Lazily answered "is this CRD installed" questions, asked at most once per pass.
#[derive(Debug, Default)]
struct InstalledCrds {
    multus: Option<bool>,
    nmstate: Option<bool>,
}

impl Reconciler {
    /// Resolves attachments for all declared networks, in declaration order.
    ///
    /// Guest facts (MAC, address, interface name) already observed in
    /// `previous` are carried over; they are refreshed from the running
    /// guest later in the pass.
    pub(crate) async fn synthesize_networks(
        &self,
        wukong: &Wukong,
        previous: &[NetworkStatus],
    ) -> Result<Vec<NetworkStatus>, ControllerError> {
        let (namespace, instance) = object_ref(wukong)?;
        let owner = owner_ref(wukong);
        let mut installed = InstalledCrds::default();
        let mut resolved = Vec::with_capacity(wukong.spec.networks.len());

        for net in &wukong.spec.networks {
            let nad_name = self
                .resolve_network(&namespace, &instance, net, owner.as_ref(), &mut installed)
                .await?;
            let mut status = NetworkStatus {
                name: net.name.clone(),
                nad_name,
                ..Default::default()
            };
            if let Some(seen) = previous.iter().find(|p| p.name == net.name) {
                status.interface_name.clone_from(&seen.interface_name);
                status.mac_address.clone_from(&seen.mac_address);
                status.ip_address.clone_from(&seen.ip_address);
            }
            resolved.push(status);
        }

        Ok(resolved)
    }

    /// Returns the attachment name of one network, `None` when it runs without one.
    async fn resolve_network(
        &self,
        namespace: &str,
        instance: &str,
        net: &NetworkConfig,
        owner: Option<&OwnerRef>,
        installed: &mut InstalledCrds,
    ) -> Result<Option<String>, ControllerError> {
        if net.is_default() {
            return Ok(None);
        }

        let Some(network_type) = net.network_type.filter(|t| t.supports_secondary()) else {
            warn!(
                "Network {} of {}/{} has type {:?}, which cannot be attached as a secondary interface; skipping",
                net.name, namespace, instance, net.network_type
            );
            return Ok(None);
        };

        if network_type.needs_node_bridge() {
            if self.crd_installed(kinds::NMSTATE_CRD, &mut installed.nmstate).await? {
                self.apply_bridge_policy(namespace, instance, net).await?;
            } else {
                warn!(
                    "NMState is not installed, not declaring host bridge {} for {}/{}",
                    net.bridge(),
                    namespace,
                    instance
                );
            }
        }

        if let Some(explicit) = &net.nad_name {
            debug!("Network {} of {}/{} uses existing attachment {}", net.name, namespace, instance, explicit);
            return Ok(Some(explicit.clone()));
        }

        if !self.crd_installed(kinds::MULTUS_CRD, &mut installed.multus).await? {
            warn!(
                "Multus is not installed, network {} of {}/{} falls back to the pod network",
                net.name, namespace, instance
            );
            return Ok(None);
        }

        let name = names::network_attachment_name(instance, &net.name);
        if self.client.network_attachment_exists(namespace, &name).await? {
            debug!("NetworkAttachmentDefinition {}/{} already exists", namespace, name);
        } else {
            let key = ObjectKey::new(namespace, &name).owned_by(owner.cloned());
            let attachment = build_network_attachment(key, net)?;
            self.client.create_network_attachment(&attachment).await?;
            info!("Created NetworkAttachmentDefinition {}/{}", namespace, name);
        }
        Ok(Some(name))
    }

    async fn crd_installed(&self, crd: &str, cached: &mut Option<bool>) -> Result<bool, ControllerError> {
        if let Some(known) = *cached {
            return Ok(known);
        }
        let exists = self.client.crd_exists(crd).await?;
        *cached = Some(exists);
        Ok(exists)
    }

    /// Creates or updates the node network policy carrying the bridge of `net`.
    ///
    /// Once the policy exists and `nodeAddress` is unset, the bridge keeps the
    /// addressing it was declared with: after NMState applies the policy the
    /// physical interface no longer reports the address it handed over.
    async fn apply_bridge_policy(&self, namespace: &str, instance: &str, net: &NetworkConfig) -> Result<(), ControllerError> {
        let name = names::node_policy_name(instance, &net.name);
        let owner = PolicyOwner::new(namespace, instance);
        let existing = self.client.get_node_network_policy(&name).await?;

        if let Some(other) = existing.as_ref().and_then(|p| p.owner.as_ref()).filter(|o| **o != owner) {
            return Err(ControllerError::Synthesis(format!(
                "NodeNetworkConfigurationPolicy {name} already belongs to Wukong {other}"
            )));
        }

        let declared = existing
            .as_ref()
            .and_then(|p| p.desired_state.interface(&net.bridge()))
            .map(|bridge| bridge.ipv4.clone());
        let addressing = match declared {
            Some(ipv4) if net.node_address.is_none() => ipv4,
            _ => self.bridge_addressing(net).await?,
        };
        let policy = build_bridge_policy(namespace, instance, net, addressing)?;

        match existing {
            None => {
                self.client.create_node_network_policy(&policy).await?;
                info!("Created NodeNetworkConfigurationPolicy {} for bridge {}", policy.name, net.bridge());
            }
            Some(existing) if existing != policy => {
                self.client.update_node_network_policy(&policy).await?;
                info!("Updated NodeNetworkConfigurationPolicy {}", policy.name);
            }
            Some(_) => debug!("NodeNetworkConfigurationPolicy {} up to date", policy.name),
        }
        Ok(())
    }

    /// IPv4 configuration the host bridge takes over from the physical interface.
    async fn bridge_addressing(&self, net: &NetworkConfig) -> Result<Ipv4, ControllerError> {
        if let Some(address) = &net.node_address {
            return Ok(Ipv4::fixed(vec![parse_node_address(&net.name, address)?]));
        }

        let Some(interface) = &net.physical_interface else {
            return Ok(Ipv4::dhcp());
        };
        match self.client.find_node_interface_ipv4(interface).await? {
            Some(state) if !state.dhcp && !state.addresses.is_empty() => {
                debug!(
                    "Carrying static address of {} on node {} over to bridge {}",
                    interface,
                    state.node,
                    net.bridge()
                );
                Ok(Ipv4::fixed(state.addresses))
            }
            _ => Ok(Ipv4::dhcp()),
        }
    }
}

/// Host bridge with the physical interface as its only port.
///
/// The bridge carries the node address and the port's own IPv4 is disabled,
/// otherwise NMState would leave the address on both.
///
/// # Errors
///
/// Returns `Synthesis` when the network names no physical interface.
pub fn build_bridge_policy(
    namespace: &str,
    instance: &str,
    net: &NetworkConfig,
    addressing: Ipv4,
) -> Result<NodeNetworkPolicy, ControllerError> {
    let physical = net.physical_interface.as_deref().filter(|p| !p.is_empty()).ok_or_else(|| {
        ControllerError::Synthesis(format!(
            "network {} needs physicalInterface to build bridge {}",
            net.name,
            net.bridge()
        ))
    })?;

    let bridge = Interface {
        name: net.bridge(),
        kind: InterfaceKind::LinuxBridge,
        state: InterfaceState::Up,
        ipv4: addressing,
        bridge: Some(Bridge {
            options: BridgeOptions::default(),
            port: vec![BridgePort {
                name: physical.to_string(),
            }],
        }),
    };
    let port = Interface {
        name: physical.to_string(),
        kind: InterfaceKind::Ethernet,
        state: InterfaceState::Up,
        ipv4: Ipv4::disabled(),
        bridge: None,
    };

    Ok(NodeNetworkPolicy {
        name: names::node_policy_name(instance, &net.name),
        owner: Some(PolicyOwner::new(namespace, instance)),
        desired_state: DesiredState {
            interfaces: vec![bridge, port],
        },
    })
}

/// Bridge CNI attachment for `net`.
///
/// # Errors
///
/// Returns `Synthesis` when a static address is not a valid IPv4 CIDR.
pub fn build_network_attachment(key: ObjectKey, net: &NetworkConfig) -> Result<NetworkAttachment, ControllerError> {
    let mut config = CniConfig::bridge(net.bridge());
    config.vlan = net.vlan_id;
    config.ipam = build_ipam(net)?;
    Ok(NetworkAttachment { key, config })
}

fn build_ipam(net: &NetworkConfig) -> Result<Option<Ipam>, ControllerError> {
    let Some(ip) = &net.ip_config else {
        return Ok(None);
    };
    match ip.mode {
        IpMode::Dhcp => Ok(Some(Ipam::Dhcp {})),
        IpMode::Static => {
            let address = ip.address.as_deref().ok_or_else(|| {
                ControllerError::Synthesis(format!("network {} has static ipConfig without address", net.name))
            })?;
            let cidr = parse_cidr(&net.name, address)?;
            let host = cidr.ip().to_string();
            Ok(Some(Ipam::HostLocal {
                subnet: format!("{}/{}", cidr.network(), cidr.prefix()),
                range_start: host.clone(),
                range_end: host,
                routes: ip
                    .gateway
                    .iter()
                    .map(|gw| Route {
                        dst: "0.0.0.0/0".to_string(),
                        gw: Some(gw.clone()),
                    })
                    .collect(),
            }))
        }
    }
}

fn parse_cidr(network: &str, address: &str) -> Result<Ipv4Network, ControllerError> {
    Ipv4Network::from_str(address)
        .map_err(|e| ControllerError::Synthesis(format!("network {network}: invalid address {address}: {e}")))
}

fn parse_node_address(network: &str, address: &str) -> Result<Ipv4Address, ControllerError> {
    let cidr = parse_cidr(network, address)?;
    Ok(Ipv4Address {
        ip: cidr.ip().to_string(),
        prefix_length: cidr.prefix(),
    })
}
