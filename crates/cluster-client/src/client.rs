//! Kubernetes-backed implementation of [`ClusterClientTrait`].
//!
//! This is the only place typed models are turned into untyped JSON.
//! Core kinds (claims, storage classes, secrets, CRDs) go through their
//! `k8s-openapi` types; third-party kinds go through `DynamicObject`.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::kinds;
use crate::models::*;
use async_trait::async_trait;
use crds::{Wukong, WukongSnapshot, WukongSnapshotStatus, WukongStatus};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

/// Field manager used for server-side apply.
const FIELD_MANAGER: &str = "wukong-controller";

/// Top-level status fields that are cleared with an explicit `null` when unset.
const WUKONG_STATUS_FIELDS: &[&str] = &["phase", "message", "vmName", "nodeName", "appliedCpu", "restoredFrom"];
const SNAPSHOT_STATUS_FIELDS: &[&str] = &["phase", "snapshotName", "creationTime", "error"];

/// Cluster client backed by a `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Wraps an existing Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    fn cluster(&self, resource: &ApiResource) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), resource)
    }

    async fn create_dynamic(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        labels: Option<&BTreeMap<String, String>>,
        body: Value,
    ) -> Result<(), ClusterError> {
        let mut obj = DynamicObject::new(&key.name, resource)
            .within(&key.namespace)
            .data(body);
        if let Some(owner) = &key.owner {
            obj.metadata.owner_references = Some(vec![owner.to_owner_reference()]);
        }
        if let Some(labels) = labels {
            obj.metadata.labels = Some(labels.clone());
        }
        let api = self.namespaced(resource, &key.namespace);
        debug!("Creating {} {}/{}", resource.kind, key.namespace, key.name);
        ignore_already_exists(api.create(&PostParams::default(), &obj).await)
    }

    async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        Ok(self.namespaced(resource, namespace).get_opt(name).await?)
    }

    async fn delete_dynamic(
        &self,
        api: Api<DynamicObject>,
        name: &str,
        params: &DeleteParams,
    ) -> Result<(), ClusterError> {
        debug!("Deleting {}", name);
        ignore_not_found(api.delete(name, params).await)
    }
}

#[async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get_wukong(&self, namespace: &str, name: &str) -> Result<Option<Wukong>, ClusterError> {
        let api: Api<Wukong> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn set_wukong_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        let api: Api<Wukong> = Api::namespaced(self.client.clone(), namespace);
        let mut metadata = json!({ "finalizers": finalizers });
        if let Some(rv) = resource_version {
            metadata["resourceVersion"] = json!(rv);
        }
        let patch = json!({ "metadata": metadata });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn patch_wukong_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &WukongStatus,
    ) -> Result<(), ClusterError> {
        let api: Api<Wukong> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(serde_json::to_value(status)?, WUKONG_STATUS_FIELDS, resource_version);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_wukong_snapshot(&self, namespace: &str, name: &str) -> Result<Option<WukongSnapshot>, ClusterError> {
        let api: Api<WukongSnapshot> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_wukong_snapshot_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WukongSnapshotStatus,
    ) -> Result<(), ClusterError> {
        let api: Api<WukongSnapshot> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(serde_json::to_value(status)?, SNAPSHOT_STATUS_FIELDS, None);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn crd_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn network_attachment_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let nad = self
            .get_dynamic(&kinds::network_attachment_definition(), namespace, name)
            .await?;
        Ok(nad.is_some())
    }

    async fn create_network_attachment(&self, attachment: &NetworkAttachment) -> Result<(), ClusterError> {
        let body = json!({ "spec": { "config": attachment.config.to_json()? } });
        self.create_dynamic(&kinds::network_attachment_definition(), &attachment.key, None, body)
            .await
    }

    async fn get_node_network_policy(&self, name: &str) -> Result<Option<NodeNetworkPolicy>, ClusterError> {
        let api = self.cluster(&kinds::node_network_configuration_policy());
        let Some(policy) = api.get_opt(name).await? else {
            return Ok(None);
        };
        // A foreign or hand-edited policy that does not parse is treated as
        // empty, which makes the caller rewrite it.
        let desired_state = policy
            .data
            .pointer("/spec/desiredState")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let owner = policy
            .metadata
            .labels
            .as_ref()
            .and_then(PolicyOwner::from_labels);
        Ok(Some(NodeNetworkPolicy {
            name: name.to_string(),
            owner,
            desired_state,
        }))
    }

    async fn create_node_network_policy(&self, policy: &NodeNetworkPolicy) -> Result<(), ClusterError> {
        let resource = kinds::node_network_configuration_policy();
        let obj = policy_object(&resource, policy);
        debug!("Creating NodeNetworkConfigurationPolicy {}", policy.name);
        ignore_already_exists(self.cluster(&resource).create(&PostParams::default(), &obj).await)
    }

    async fn update_node_network_policy(&self, policy: &NodeNetworkPolicy) -> Result<(), ClusterError> {
        let resource = kinds::node_network_configuration_policy();
        let obj = policy_object(&resource, policy);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.cluster(&resource)
            .patch(&policy.name, &params, &Patch::Apply(&obj))
            .await?;
        Ok(())
    }

    async fn delete_node_network_policy(&self, name: &str) -> Result<(), ClusterError> {
        let api = self.cluster(&kinds::node_network_configuration_policy());
        self.delete_dynamic(api, name, &DeleteParams::default()).await
    }

    async fn find_node_interface_ipv4(&self, interface: &str) -> Result<Option<NodeInterfaceIpv4>, ClusterError> {
        let api = self.cluster(&kinds::node_network_state());
        let states = api.list(&Default::default()).await?;
        for state in states.items {
            let node = state.metadata.name.clone().unwrap_or_default();
            let Some(interfaces) = state
                .data
                .pointer("/status/currentState/interfaces")
                .and_then(Value::as_array)
            else {
                continue;
            };
            let found = interfaces
                .iter()
                .find(|i| i.get("name").and_then(Value::as_str) == Some(interface));
            if let Some(iface) = found {
                return Ok(Some(parse_node_ipv4(node, iface)));
            }
        }
        Ok(None)
    }

    async fn get_data_volume(&self, namespace: &str, name: &str) -> Result<Option<DataVolumeObservation>, ClusterError> {
        let dv = self.get_dynamic(&kinds::data_volume(), namespace, name).await?;
        Ok(dv.map(|dv| DataVolumeObservation {
            phase: DataVolumePhase::from_status(str_at(&dv.data, "/status/phase")),
            progress: str_at(&dv.data, "/status/progress").map(str::to_string),
        }))
    }

    async fn create_data_volume(&self, data_volume: &DataVolume) -> Result<(), ClusterError> {
        let body = json!({ "spec": data_volume.spec });
        self.create_dynamic(&kinds::data_volume(), &data_volume.key, None, body)
            .await
    }

    async fn delete_data_volume(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api = self.namespaced(&kinds::data_volume(), namespace);
        self.delete_dynamic(api, name, &DeleteParams::default()).await
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<ClaimObservation>, ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let Some(pvc) = api.get_opt(name).await? else {
            return Ok(None);
        };
        let spec = pvc.spec.unwrap_or_default();
        let status = pvc.status.unwrap_or_default();
        Ok(Some(ClaimObservation {
            phase: ClaimPhase::from_status(status.phase.as_deref()),
            storage_class_name: spec.storage_class_name,
            requested: spec
                .resources
                .and_then(|r| r.requests)
                .and_then(|r| r.get("storage").map(|q| q.0.clone())),
            capacity: status
                .capacity
                .and_then(|c| c.get("storage").map(|q| q.0.clone())),
            owners: pvc
                .metadata
                .owner_references
                .unwrap_or_default()
                .into_iter()
                .map(|o| ObservedOwner {
                    kind: o.kind,
                    name: o.name,
                    uid: o.uid,
                })
                .collect(),
        }))
    }

    async fn create_claim(&self, claim: &ClaimRequest) -> Result<(), ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &claim.key.namespace);
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(claim.key.name.clone()),
                namespace: Some(claim.key.namespace.clone()),
                owner_references: claim.key.owner.as_ref().map(|o| vec![o.to_owner_reference()]),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(claim.template.access_modes.clone()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(claim.template.size().to_string()),
                    )])),
                    ..Default::default()
                }),
                storage_class_name: Some(claim.template.storage_class_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        debug!("Creating PersistentVolumeClaim {}/{}", claim.key.namespace, claim.key.name);
        ignore_already_exists(api.create(&PostParams::default(), &pvc).await)
    }

    async fn expand_claim(&self, namespace: &str, name: &str, size: &str) -> Result<(), ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "spec": { "resources": { "requests": { "storage": size } } } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClassInfo>, ClusterError> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.map(|sc| StorageClassInfo {
            volume_binding_mode: sc.volume_binding_mode,
            allow_volume_expansion: sc.allow_volume_expansion.unwrap_or(false),
        }))
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect()
        }))
    }

    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachineObservation>, ClusterError> {
        let vm = self.get_dynamic(&kinds::virtual_machine(), namespace, name).await?;
        Ok(vm.map(|vm| VirtualMachineObservation {
            resource_version: vm.metadata.resource_version.clone(),
            spec: vm.data.get("spec").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn create_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ClusterError> {
        let body = json!({ "spec": vm.spec });
        self.create_dynamic(&kinds::virtual_machine(), &vm.key, Some(&vm.labels), body)
            .await
    }

    async fn update_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ClusterError> {
        let resource = kinds::virtual_machine();
        let mut obj = DynamicObject::new(&vm.key.name, &resource)
            .within(&vm.key.namespace)
            .data(json!({ "spec": vm.spec }));
        obj.metadata.labels = Some(vm.labels.clone());
        if let Some(owner) = &vm.key.owner {
            obj.metadata.owner_references = Some(vec![owner.to_owner_reference()]);
        }
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.namespaced(&resource, &vm.key.namespace)
            .patch(&vm.key.name, &params, &Patch::Apply(&obj))
            .await?;
        Ok(())
    }

    async fn delete_virtual_machine(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        // Foreground deletion keeps the VM visible until its instance is gone.
        let api = self.namespaced(&kinds::virtual_machine(), namespace);
        self.delete_dynamic(api, name, &DeleteParams::foreground()).await
    }

    async fn get_virtual_machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstanceObservation>, ClusterError> {
        let vmi = self
            .get_dynamic(&kinds::virtual_machine_instance(), namespace, name)
            .await?;
        Ok(vmi.map(|vmi| InstanceObservation {
            phase: str_at(&vmi.data, "/status/phase").map(str::to_string),
            node_name: str_at(&vmi.data, "/status/nodeName").map(str::to_string),
            interfaces: vmi
                .data
                .pointer("/status/interfaces")
                .and_then(Value::as_array)
                .map(|list| list.iter().map(parse_instance_interface).collect())
                .unwrap_or_default(),
        }))
    }

    async fn get_vm_snapshot(&self, namespace: &str, name: &str) -> Result<Option<SnapshotObservation>, ClusterError> {
        let snapshot = self
            .get_dynamic(&kinds::virtual_machine_snapshot(), namespace, name)
            .await?;
        Ok(snapshot.map(|s| SnapshotObservation {
            ready_to_use: s
                .data
                .pointer("/status/readyToUse")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            phase: str_at(&s.data, "/status/phase").map(str::to_string),
            creation_time: str_at(&s.data, "/status/creationTime")
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&chrono::Utc)),
            error: str_at(&s.data, "/status/error/message").map(str::to_string),
        }))
    }

    async fn create_vm_snapshot(&self, snapshot: &VirtualMachineSnapshot) -> Result<(), ClusterError> {
        let body = json!({ "spec": snapshot.spec });
        self.create_dynamic(&kinds::virtual_machine_snapshot(), &snapshot.key, None, body)
            .await
    }

    async fn get_vm_restore(&self, namespace: &str, name: &str) -> Result<Option<RestoreObservation>, ClusterError> {
        let restore = self
            .get_dynamic(&kinds::virtual_machine_restore(), namespace, name)
            .await?;
        Ok(restore.map(|r| RestoreObservation {
            complete: r
                .data
                .pointer("/status/complete")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }))
    }

    async fn create_vm_restore(&self, restore: &VirtualMachineRestore) -> Result<(), ClusterError> {
        let body = json!({ "spec": restore.spec });
        self.create_dynamic(&kinds::virtual_machine_restore(), &restore.key, None, body)
            .await
    }
}

fn policy_object(resource: &ApiResource, policy: &NodeNetworkPolicy) -> DynamicObject {
    let mut obj = DynamicObject::new(&policy.name, resource)
        .data(json!({ "spec": { "desiredState": policy.desired_state } }));
    obj.metadata.labels = policy.owner.as_ref().map(PolicyOwner::labels);
    obj
}

fn ignore_already_exists<T>(result: Result<T, kube::Error>) -> Result<(), ClusterError> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.reason == "AlreadyExists" => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), ClusterError> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Merge patch that writes `status` as a whole.
///
/// Merge patches leave absent keys untouched, so unset optional fields are
/// sent as `null` to clear them. Lists are replaced wholesale by merge patch
/// semantics already.
fn status_patch(mut status: Value, clearable: &[&str], resource_version: Option<&str>) -> Value {
    if let Some(fields) = status.as_object_mut() {
        for field in clearable {
            fields.entry((*field).to_string()).or_insert(Value::Null);
        }
    }
    let mut patch = json!({ "status": status });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    patch
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn parse_instance_interface(value: &Value) -> InstanceInterface {
    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
    InstanceInterface {
        name: field("name"),
        mac: field("mac"),
        ip_address: field("ipAddress"),
        interface_name: field("interfaceName"),
    }
}

fn parse_node_ipv4(node: String, iface: &Value) -> NodeInterfaceIpv4 {
    let ipv4 = iface.get("ipv4").cloned().unwrap_or(Value::Null);
    let addresses = ipv4
        .get("address")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    let ip = a.get("ip")?.as_str()?.to_string();
                    let prefix_length = u8::try_from(a.get("prefix-length")?.as_u64()?).ok()?;
                    Some(nmstate::Ipv4Address { ip, prefix_length })
                })
                .collect()
        })
        .unwrap_or_default();
    NodeInterfaceIpv4 {
        node,
        dhcp: ipv4.get("dhcp").and_then(Value::as_bool).unwrap_or(false),
        addresses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_patch_clears_unset_fields() {
        let status = WukongStatus {
            vm_name: Some("vm1-vm".to_string()),
            ..Default::default()
        };
        let patch = status_patch(
            serde_json::to_value(&status).unwrap(),
            WUKONG_STATUS_FIELDS,
            Some("42"),
        );
        assert_eq!(patch["status"]["vmName"], "vm1-vm");
        assert_eq!(patch["status"]["message"], Value::Null);
        assert!(patch["status"].as_object().unwrap().contains_key("message"));
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
    }

    #[test]
    fn test_parse_node_ipv4() {
        let iface = json!({
            "name": "eth1",
            "ipv4": {"enabled": true, "dhcp": false, "address": [{"ip": "10.1.0.7", "prefix-length": 16}]}
        });
        let parsed = parse_node_ipv4("node-a".to_string(), &iface);
        assert_eq!(parsed.node, "node-a");
        assert!(!parsed.dhcp);
        assert_eq!(parsed.addresses[0].ip, "10.1.0.7");
        assert_eq!(parsed.addresses[0].prefix_length, 16);
    }

    #[test]
    fn test_parse_instance_interface() {
        let parsed = parse_instance_interface(&json!({
            "name": "data", "mac": "02:00:00:00:00:01", "ipAddress": "10.0.0.5", "interfaceName": "enp2s0"
        }));
        assert_eq!(parsed.name.as_deref(), Some("data"));
        assert_eq!(parsed.interface_name.as_deref(), Some("enp2s0"));
    }
}
