//! VM spec synthesizer
//!
//! Builds the KubeVirt VirtualMachine from the Wukong spec and the resolved
//! networks and volumes, applies it, and reads guest facts back from the
//! VirtualMachineInstance.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::spec_needs_update;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cluster_client::models::virtualmachine::{
    Cpu, Devices, Disk, DiskTarget, Domain, Gpu, InstanceSpec, InstanceTemplate, Interface, InterfaceBinding,
    Memory, MultusNetwork, Network, NetworkSource, TemplateMetadata, Volume, VolumeSource, VirtualMachineSpec,
    DISK_BUS,
};
use cluster_client::{InstanceObservation, ObjectKey, VirtualMachine};
use crds::{
    DEFAULT_NETWORK_NAME, NetworkStatus, Quantity, RestartPolicy, RunStrategy, VolumeStatus, WukongSpec,
};
use k8s_openapi::api::core::v1::Toleration;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "wukong-controller";
pub const INSTANCE_LABEL: &str = "vm.novasphere.dev/instance";

/// Guest memory used when the declared quantity does not parse.
const FALLBACK_MEMORY: &str = "2Gi";
const CLOUD_INIT_VOLUME: &str = "cloudinitdisk";

/// Guest lifecycle as seen through the VirtualMachineInstance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestState {
    Running,
    /// Scheduling, booting, or waiting to be started
    Starting,
    Stopped,
    Failed(String),
}

/// Maps the instance phase, `None` when no instance exists.
pub fn guest_state(instance: Option<&InstanceObservation>, auto_start: bool) -> GuestState {
    let Some(instance) = instance else {
        return if auto_start { GuestState::Starting } else { GuestState::Stopped };
    };
    match instance.phase.as_deref() {
        Some("Running") => GuestState::Running,
        // A guest that exited on its own under `Once` or `Manual`
        Some("Succeeded") => GuestState::Stopped,
        Some(phase @ ("Failed" | "Unknown")) => GuestState::Failed(format!("guest reported phase {phase}")),
        _ => GuestState::Starting,
    }
}

/// Effective run strategy.
///
/// An explicit strategy wins, then a disabled auto start, then the HA
/// restart policy.
pub fn run_strategy(spec: &WukongSpec) -> RunStrategy {
    if let Some(explicit) = spec.start_strategy.as_ref().and_then(|s| s.run_strategy) {
        return explicit;
    }
    if !spec.auto_start() {
        return RunStrategy::Halted;
    }
    match spec.high_availability.as_ref().and_then(|ha| ha.restart_policy) {
        Some(RestartPolicy::OnFailure) => RunStrategy::RerunOnFailure,
        Some(RestartPolicy::Never) => RunStrategy::Once,
        Some(RestartPolicy::Always) | None => RunStrategy::Always,
    }
}

/// Name of the network that replaces the pod network as the guest's
/// primary interface, if a primary network resolved to an attachment.
fn primary_network<'a>(spec: &'a WukongSpec, resolved: &[NetworkStatus]) -> Option<&'a str> {
    spec.networks
        .iter()
        .filter(|n| n.primary && !n.is_default())
        .find(|n| resolved.iter().any(|r| r.name == n.name && r.nad_name.is_some()))
        .map(|n| n.name.as_str())
}

/// Whether the guest's first interface is the pod network.
pub fn uses_pod_interface(spec: &WukongSpec, resolved: &[NetworkStatus]) -> bool {
    primary_network(spec, resolved).is_none()
}

/// Everything the VirtualMachine is built from.
#[derive(Debug)]
pub struct VmInputs<'a> {
    pub key: ObjectKey,
    pub instance: &'a str,
    pub spec: &'a WukongSpec,
    pub networks: &'a [NetworkStatus],
    pub volumes: &'a [VolumeStatus],
    pub run_strategy: RunStrategy,
    pub cloud_init: Option<&'a str>,
}

/// Builds the VirtualMachine.
pub fn build_virtual_machine(inputs: VmInputs<'_>) -> VirtualMachine {
    let VmInputs {
        key,
        instance,
        spec,
        networks,
        volumes,
        run_strategy,
        cloud_init,
    } = inputs;

    let memory = match Quantity::parse(&spec.memory) {
        Ok(_) => spec.memory.clone(),
        Err(e) => {
            warn!("Memory of {} does not parse ({}), using {}", instance, e, FALLBACK_MEMORY);
            FALLBACK_MEMORY.to_string()
        }
    };

    let mut devices = Devices::default();
    let mut vm_volumes = Vec::new();
    let mut boot_order = 0;
    for disk in &spec.disks {
        let Some(volume) = volumes.iter().find(|v| v.name == disk.name) else {
            continue;
        };
        let order = disk.boot.then(|| {
            boot_order += 1;
            boot_order
        });
        devices.disks.push(Disk {
            name: disk.name.clone(),
            disk: DiskTarget {
                bus: DISK_BUS.to_string(),
            },
            boot_order: order,
        });
        let source = if disk.image.is_some() {
            VolumeSource::DataVolume {
                name: volume.pvc_name.clone(),
            }
        } else {
            VolumeSource::PersistentVolumeClaim {
                claim_name: volume.pvc_name.clone(),
            }
        };
        vm_volumes.push(Volume {
            name: disk.name.clone(),
            source,
        });
    }

    if let Some(user_data) = cloud_init {
        devices.disks.push(Disk {
            name: CLOUD_INIT_VOLUME.to_string(),
            disk: DiskTarget {
                bus: DISK_BUS.to_string(),
            },
            boot_order: None,
        });
        vm_volumes.push(Volume {
            name: CLOUD_INIT_VOLUME.to_string(),
            source: VolumeSource::CloudInitNoCloud {
                user_data_base64: STANDARD.encode(user_data),
            },
        });
    }

    let primary = primary_network(spec, networks);
    let mut vm_networks = Vec::new();
    if primary.is_none() {
        devices.interfaces.push(Interface {
            name: DEFAULT_NETWORK_NAME.to_string(),
            binding: InterfaceBinding::Masquerade {},
        });
        vm_networks.push(Network {
            name: DEFAULT_NETWORK_NAME.to_string(),
            source: NetworkSource::Pod {},
        });
    }
    for net in spec.networks.iter().filter(|n| !n.is_default()) {
        let Some(nad) = networks
            .iter()
            .find(|r| r.name == net.name)
            .and_then(|r| r.nad_name.as_ref())
        else {
            continue;
        };
        devices.interfaces.push(Interface {
            name: net.name.clone(),
            binding: InterfaceBinding::Bridge {},
        });
        vm_networks.push(Network {
            name: net.name.clone(),
            source: NetworkSource::Multus(MultusNetwork {
                network_name: nad.clone(),
                default: primary == Some(net.name.as_str()),
            }),
        });
    }

    devices.gpus = spec
        .gpus
        .iter()
        .map(|g| Gpu {
            name: g.name.clone(),
            device_name: g.device_name.clone(),
        })
        .collect();

    let (node_selector, tolerations) = match &spec.high_availability {
        Some(ha) => (
            ha.node_selector.clone(),
            ha.tolerations
                .iter()
                .map(|t| Toleration {
                    key: t.key.clone(),
                    operator: t.operator.clone(),
                    value: t.value.clone(),
                    effect: t.effect.clone(),
                    toleration_seconds: t.toleration_seconds,
                })
                .collect(),
        ),
        None => (BTreeMap::new(), Vec::new()),
    };

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(INSTANCE_LABEL.to_string(), instance.to_string());
    let mut template_labels = BTreeMap::new();
    template_labels.insert(INSTANCE_LABEL.to_string(), instance.to_string());

    VirtualMachine {
        key,
        labels,
        spec: VirtualMachineSpec {
            run_strategy: run_strategy.as_str().to_string(),
            template: InstanceTemplate {
                metadata: TemplateMetadata {
                    labels: template_labels,
                },
                spec: InstanceSpec {
                    domain: Domain {
                        cpu: Cpu {
                            cores: spec.cpu.unsigned_abs(),
                        },
                        memory: Memory { guest: memory },
                        devices,
                    },
                    networks: vm_networks,
                    volumes: vm_volumes,
                    node_selector,
                    tolerations,
                },
            },
        },
    }
}

/// Copies guest facts of a running instance into the network statuses.
///
/// Facts the guest stopped reporting keep their last known value.
pub fn merge_instance_interfaces(networks: &mut [NetworkStatus], instance: &InstanceObservation) {
    for status in networks.iter_mut() {
        let Some(iface) = instance
            .interfaces
            .iter()
            .find(|i| i.name.as_deref() == Some(status.name.as_str()))
        else {
            continue;
        };
        if iface.mac.is_some() {
            status.mac_address.clone_from(&iface.mac);
        }
        if iface.ip_address.is_some() {
            status.ip_address.clone_from(&iface.ip_address);
        }
        if iface.interface_name.is_some() {
            status.interface_name.clone_from(&iface.interface_name);
        }
    }
}

impl Reconciler {
    /// Creates the VirtualMachine, or updates it when its managed fields drifted.
    pub(crate) async fn apply_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ControllerError> {
        let namespace = &vm.key.namespace;
        let name = &vm.key.name;

        let Some(existing) = self.client.get_virtual_machine(namespace, name).await? else {
            self.client.create_virtual_machine(vm).await?;
            info!("Created VirtualMachine {}/{}", namespace, name);
            return Ok(());
        };

        let desired = serde_json::to_value(&vm.spec)
            .map_err(|e| ControllerError::Synthesis(format!("VirtualMachine {name}: {e}")))?;
        if spec_needs_update(&desired, &existing.spec) {
            self.client.update_virtual_machine(vm).await?;
            info!("Updated VirtualMachine {}/{}", namespace, name);
        } else {
            debug!("VirtualMachine {}/{} up to date", namespace, name);
        }
        Ok(())
    }
}
