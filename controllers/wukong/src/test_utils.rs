//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and driving
//! reconciliation passes against the in-memory cluster client.

#[cfg(test)]
use crate::metrics::Metrics;
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use cluster_client::{InstanceInterface, InstanceObservation, MockClusterClient, StorageClassInfo};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use kube_runtime::controller::Action;
#[cfg(test)]
use std::time::Duration;

/// Helper to create a test disk
#[cfg(test)]
pub fn create_test_disk(name: &str, size: &str) -> DiskConfig {
    DiskConfig {
        name: name.to_string(),
        size: size.to_string(),
        storage_class_name: "standard".to_string(),
        boot: true,
        image: None,
    }
}

/// Helper to create a bridged secondary network on `eth1`
#[cfg(test)]
pub fn create_test_bridge_network(name: &str) -> NetworkConfig {
    NetworkConfig {
        name: name.to_string(),
        network_type: Some(NetworkType::Bridge),
        physical_interface: Some("eth1".to_string()),
        ..Default::default()
    }
}

/// Helper to create a test Wukong: 2 CPUs, 4Gi, a 20Gi root disk and the pod network
#[cfg(test)]
pub fn create_test_wukong(name: &str, namespace: &str) -> Wukong {
    Wukong {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: WukongSpec {
            cpu: 2,
            memory: "4Gi".to_string(),
            os_image: None,
            ssh_key_secret: None,
            cloud_init_user: None,
            networks: vec![NetworkConfig {
                name: DEFAULT_NETWORK_NAME.to_string(),
                ..Default::default()
            }],
            disks: vec![create_test_disk("root", "20Gi")],
            high_availability: None,
            start_strategy: None,
            gpus: Vec::new(),
            restore_from_snapshot: None,
        },
        status: None,
    }
}

/// Helper to create a test Wukong that already carries the finalizer
#[cfg(test)]
pub fn create_test_wukong_with_finalizer(name: &str, namespace: &str) -> Wukong {
    let mut wukong = create_test_wukong(name, namespace);
    wukong.metadata.finalizers = Some(vec![WUKONG_FINALIZER.to_string()]);
    wukong
}

/// Helper to create a test WukongSnapshot
#[cfg(test)]
pub fn create_test_wukong_snapshot(name: &str, namespace: &str, wukong_name: &str) -> WukongSnapshot {
    WukongSnapshot {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        },
        spec: WukongSnapshotSpec {
            wukong_name: wukong_name.to_string(),
        },
        status: None,
    }
}

/// Helper to create a reconciler over a mock client
#[cfg(test)]
pub fn create_test_reconciler(mock: MockClusterClient) -> Reconciler {
    Reconciler::new(mock, Duration::from_secs(5), Metrics::new().unwrap())
}

/// Storage class binding immediately, with expansion allowed or not
#[cfg(test)]
pub fn immediate_storage_class(allow_volume_expansion: bool) -> StorageClassInfo {
    StorageClassInfo {
        volume_binding_mode: Some("Immediate".to_string()),
        allow_volume_expansion,
    }
}

/// Running guest scheduled on `node`
#[cfg(test)]
pub fn running_instance(node: &str) -> InstanceObservation {
    InstanceObservation {
        phase: Some("Running".to_string()),
        node_name: Some(node.to_string()),
        interfaces: Vec::new(),
    }
}

/// Running guest reporting one interface on `network`
#[cfg(test)]
pub fn running_instance_with_interface(node: &str, network: &str, mac: &str, ip: &str) -> InstanceObservation {
    let mut instance = running_instance(node);
    instance.interfaces.push(InstanceInterface {
        name: Some(network.to_string()),
        mac: Some(mac.to_string()),
        ip_address: Some(ip.to_string()),
        interface_name: Some("enp2s0".to_string()),
    });
    instance
}

/// Runs one pass over the Wukong as currently stored in the mock
#[cfg(test)]
pub async fn reconcile_stored(reconciler: &Reconciler, mock: &MockClusterClient, namespace: &str, name: &str) -> Action {
    let wukong = mock.wukong(namespace, name).unwrap();
    reconciler.reconcile_wukong(&wukong).await.unwrap()
}

/// Status of the Wukong as currently stored in the mock
#[cfg(test)]
pub fn stored_status(mock: &MockClusterClient, namespace: &str, name: &str) -> WukongStatus {
    mock.wukong(namespace, name)
        .and_then(|w| w.status)
        .unwrap_or_default()
}
