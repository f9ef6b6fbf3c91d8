//! Guest first-boot configuration
//!
//! Renders the `#cloud-config` user data handed to the guest through a
//! NoCloud volume: the login user, SSH keys from a Secret and netplan v2
//! addressing for secondary interfaces.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::object_ref;
use crds::{IpMode, NetworkConfig, NetworkStatus, Wukong, WukongSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const HEADER: &str = "#cloud-config\n";
const DEFAULT_SUDO: &str = "ALL=(ALL) NOPASSWD:ALL";
const DEFAULT_SHELL: &str = "/bin/bash";
const DEFAULT_GROUPS: &str = "sudo, adm, dialout, cdrom, floppy, audio, dip, video, plugdev, netdev";

/// Secret keys searched for SSH public keys, in order.
const SSH_KEY_NAMES: [&str; 4] = ["ssh-publickey", "id_rsa.pub", "authorized_keys", "publickey"];

#[derive(Debug, Default, Serialize)]
struct CloudConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    users: Vec<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_pwauth: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disable_root: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<NetworkV2>,
}

#[derive(Debug, Serialize)]
struct User {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    passwd: Option<String>,
    sudo: String,
    shell: String,
    groups: String,
    lock_passwd: bool,
}

#[derive(Debug, Serialize)]
struct NetworkV2 {
    version: u8,
    ethernets: BTreeMap<String, Ethernet>,
}

#[derive(Debug, Serialize)]
struct Ethernet {
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    match_mac: Option<MacMatch>,
    dhcp4: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nameservers: Option<Nameservers>,
}

#[derive(Debug, Serialize)]
struct MacMatch {
    macaddress: String,
}

#[derive(Debug, Serialize)]
struct Nameservers {
    addresses: Vec<String>,
}

/// Whether the guest gets a cloud-init volume at all.
pub fn wants_cloud_init(spec: &WukongSpec) -> bool {
    spec.os_image.is_some()
        || spec.ssh_key_secret.is_some()
        || spec.cloud_init_user.is_some()
        || spec
            .networks
            .iter()
            .any(|n| !n.is_default() && n.ip_config.is_some())
}

/// SSH keys of a Secret: the first conventional key name present, else the
/// first non-empty value. Blank and comment lines are dropped.
pub fn extract_ssh_keys(data: &BTreeMap<String, Vec<u8>>) -> Vec<String> {
    let raw = SSH_KEY_NAMES
        .iter()
        .find_map(|k| data.get(*k).filter(|v| !v.is_empty()))
        .or_else(|| data.values().find(|v| !v.is_empty()));

    raw.map(|bytes| {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Renders user data for `spec`.
///
/// `networks` are the resolved networks, used for MAC matching and to skip
/// networks that ended up without an attachment. `pod_interface` tells
/// whether the guest's first NIC is the pod network, which shifts the
/// positional `eth<N>` names.
///
/// # Errors
///
/// Returns `Synthesis` when the document cannot be serialized.
pub fn render_cloud_config(
    spec: &WukongSpec,
    ssh_keys: Vec<String>,
    networks: &[NetworkStatus],
    pod_interface: bool,
) -> Result<String, ControllerError> {
    let mut config = CloudConfig {
        ssh_authorized_keys: ssh_keys,
        network: guest_network(&spec.networks, networks, pod_interface),
        ..Default::default()
    };

    if let Some(user) = &spec.cloud_init_user {
        let passwd = match (&user.password_hash, &user.password) {
            (Some(hash), _) => Some(hash.clone()),
            (None, Some(plain)) => {
                warn!(
                    "Guest user {} has a plaintext password; images that expect a hash will ignore it, use passwordHash",
                    user.name
                );
                Some(plain.clone())
            }
            (None, None) => None,
        };
        config.users.push(User {
            name: user.name.clone(),
            passwd,
            sudo: user.sudo.clone().unwrap_or_else(|| DEFAULT_SUDO.to_string()),
            shell: user.shell.clone().unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            groups: if user.groups.is_empty() {
                DEFAULT_GROUPS.to_string()
            } else {
                user.groups.join(", ")
            },
            lock_passwd: user.lock_passwd,
        });
        config.ssh_pwauth = Some(true);
        config.disable_root = Some(false);
    }

    let has_content = !config.users.is_empty() || !config.ssh_authorized_keys.is_empty() || config.network.is_some();
    if !has_content {
        return Ok(HEADER.to_string());
    }

    let body = serde_yaml::to_string(&config)
        .map_err(|e| ControllerError::Synthesis(format!("failed to render cloud-init: {e}")))?;
    Ok(format!("{HEADER}{body}"))
}

/// Netplan entries for attached secondary networks with an `ipConfig`.
///
/// Entries match on the MAC observed on a previous pass. Before the guest
/// ever reported one, the positional name is a best guess and can be wrong
/// if the guest OS names interfaces differently.
fn guest_network(declared: &[NetworkConfig], resolved: &[NetworkStatus], pod_interface: bool) -> Option<NetworkV2> {
    let mut ethernets = BTreeMap::new();
    let mut position = usize::from(pod_interface);

    for net in declared.iter().filter(|n| !n.is_default()) {
        let Some(status) = resolved.iter().find(|s| s.name == net.name && s.nad_name.is_some()) else {
            continue;
        };
        let index = position;
        position += 1;

        let Some(ip) = &net.ip_config else {
            continue;
        };
        let mut entry = Ethernet {
            match_mac: None,
            dhcp4: ip.mode == IpMode::Dhcp,
            addresses: Vec::new(),
            gateway4: None,
            nameservers: None,
        };
        if ip.mode == IpMode::Static {
            entry.addresses = ip.address.iter().cloned().collect();
            entry.gateway4.clone_from(&ip.gateway);
            if !ip.dns_servers.is_empty() {
                entry.nameservers = Some(Nameservers {
                    addresses: ip.dns_servers.clone(),
                });
            }
        }

        let key = match &status.mac_address {
            Some(mac) => {
                entry.match_mac = Some(MacMatch {
                    macaddress: mac.clone(),
                });
                net.name.clone()
            }
            None => format!("eth{index}"),
        };
        ethernets.insert(key, entry);
    }

    if ethernets.is_empty() {
        None
    } else {
        Some(NetworkV2 { version: 2, ethernets })
    }
}

impl Reconciler {
    /// User data for the guest, `None` when nothing needs configuring.
    pub(crate) async fn build_cloud_init(
        &self,
        wukong: &Wukong,
        networks: &[NetworkStatus],
        pod_interface: bool,
    ) -> Result<Option<String>, ControllerError> {
        if !wants_cloud_init(&wukong.spec) {
            return Ok(None);
        }
        let (namespace, name) = object_ref(wukong)?;

        let mut ssh_keys = Vec::new();
        if let Some(secret) = &wukong.spec.ssh_key_secret {
            match self.client.get_secret_data(&namespace, secret).await? {
                Some(data) => {
                    ssh_keys = extract_ssh_keys(&data);
                    if ssh_keys.is_empty() {
                        warn!("Secret {}/{} holds no SSH public key", namespace, secret);
                    }
                }
                None => warn!("SSH key Secret {}/{} not found, guest gets no keys", namespace, secret),
            }
        }
        let document = render_cloud_config(&wukong.spec, ssh_keys, networks, pod_interface)?;
        debug!("Rendered {} bytes of cloud-init for {}/{}", document.len(), namespace, name);
        Ok(Some(document))
    }
}
