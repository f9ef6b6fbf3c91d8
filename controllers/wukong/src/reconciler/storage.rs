//! Storage synthesizer
//!
//! Every disk is backed by a claim named `<instance>-<disk>`. Disks with an
//! image get a DataVolume that imports the image into that claim, the others
//! get a bare claim. Objects are created once and only observed afterwards.

use super::Reconciler;
use super::names;
use crate::error::ControllerError;
use crate::reconcile_helpers::{object_ref, owner_ref};
use cluster_client::{
    ClaimObservation, ClaimPhase, ClaimRequest, ClaimTemplate, DataVolume, DataVolumePhase, DataVolumeSpec,
    ImportSource, ObjectKey, OwnerRef,
};
use crds::{DiskConfig, Quantity, VolumeStatus, Wukong};
use tracing::{debug, info, warn};

/// CDI pulls registry images through an importer pod.
const REGISTRY_PULL_METHOD: &str = "pod";

impl Reconciler {
    /// Ensures the backing object of every disk exists and reports its state.
    ///
    /// # Errors
    ///
    /// Returns `StorageFailed` when an import or a claim reached a failure phase.
    pub(crate) async fn synthesize_storage(&self, wukong: &Wukong) -> Result<Vec<VolumeStatus>, ControllerError> {
        let (namespace, instance) = object_ref(wukong)?;
        let owner = owner_ref(wukong);

        let mut volumes = Vec::with_capacity(wukong.spec.disks.len());
        for disk in &wukong.spec.disks {
            volumes.push(self.ensure_disk(&namespace, &instance, disk, owner.as_ref()).await?);
        }
        Ok(volumes)
    }

    async fn ensure_disk(
        &self,
        namespace: &str,
        instance: &str,
        disk: &DiskConfig,
        owner: Option<&OwnerRef>,
    ) -> Result<VolumeStatus, ControllerError> {
        let name = names::disk_claim_name(instance, &disk.name);
        let key = ObjectKey::new(namespace, &name).owned_by(owner.cloned());

        let import_phase = match &disk.image {
            Some(image) => match self.client.get_data_volume(namespace, &name).await? {
                Some(observed) => Some(observed.phase),
                None => {
                    self.client.create_data_volume(&build_data_volume(key, disk, image)).await?;
                    info!("Created DataVolume {}/{} importing {}", namespace, name, image);
                    return Ok(pending_volume(disk, name));
                }
            },
            None => None,
        };

        if import_phase == Some(DataVolumePhase::Failed) {
            return Err(ControllerError::StorageFailed {
                disk: disk.name.clone(),
                reason: format!("import into DataVolume {name} failed"),
            });
        }

        let claim = match self.client.get_claim(namespace, &name).await? {
            Some(claim) => claim,
            // CDI creates the claim of an import asynchronously.
            None if import_phase.is_some() => return Ok(pending_volume(disk, name)),
            None => {
                let request = ClaimRequest {
                    key,
                    template: ClaimTemplate::new(&disk.size, &disk.storage_class_name),
                };
                self.client.create_claim(&request).await?;
                info!("Created PersistentVolumeClaim {}/{}", namespace, name);
                return Ok(pending_volume(disk, name));
            }
        };

        if claim.phase == ClaimPhase::Lost {
            return Err(ControllerError::StorageFailed {
                disk: disk.name.clone(),
                reason: format!("claim {name} lost its volume"),
            });
        }

        let late_binding = claim.phase == ClaimPhase::Pending && self.waits_for_first_consumer(&claim).await?;
        let status = volume_status(disk, name, import_phase.as_ref(), &claim, late_binding);
        debug!(
            "Volume {} of {}/{}: bound={} schedulable={}",
            disk.name, namespace, instance, status.bound, status.schedulable
        );
        Ok(status)
    }

    async fn waits_for_first_consumer(&self, claim: &ClaimObservation) -> Result<bool, ControllerError> {
        let Some(class) = claim.storage_class_name.as_deref().filter(|c| !c.is_empty()) else {
            return Ok(false);
        };
        Ok(self
            .client
            .get_storage_class(class)
            .await?
            .is_some_and(|sc| sc.waits_for_first_consumer()))
    }

    /// Grows bound claims whose disk size was raised.
    ///
    /// Best effort: failures are logged and the next pass tries again.
    pub(crate) async fn expand_volumes(&self, wukong: &Wukong) {
        let Ok((namespace, instance)) = object_ref(wukong) else {
            return;
        };
        for disk in &wukong.spec.disks {
            let name = names::disk_claim_name(&instance, &disk.name);
            if let Err(e) = self.expand_claim(&namespace, &name, disk).await {
                warn!("Failed to expand claim {}/{} to {}: {}", namespace, name, disk.size, e);
            }
        }
    }

    async fn expand_claim(&self, namespace: &str, name: &str, disk: &DiskConfig) -> Result<(), ControllerError> {
        let Some(claim) = self.client.get_claim(namespace, name).await? else {
            return Ok(());
        };
        if claim.phase != ClaimPhase::Bound {
            return Ok(());
        }

        let Some(current) = claim.requested.as_deref().or(claim.capacity.as_deref()) else {
            return Ok(());
        };
        let (Ok(current_size), Ok(wanted)) = (Quantity::parse(current), Quantity::parse(&disk.size)) else {
            return Ok(());
        };
        if wanted <= current_size {
            return Ok(());
        }

        let class = claim.storage_class_name.as_deref().unwrap_or(&disk.storage_class_name);
        let expandable = self
            .client
            .get_storage_class(class)
            .await?
            .is_some_and(|sc| sc.allow_volume_expansion);
        if !expandable {
            warn!(
                "Storage class {} does not allow expansion, claim {}/{} stays at {}",
                class, namespace, name, current
            );
            return Ok(());
        }

        self.client.expand_claim(namespace, name, &disk.size).await?;
        info!("Expanding claim {}/{} from {} to {}", namespace, name, current, disk.size);
        Ok(())
    }
}

/// DataVolume importing `image` into a claim of the disk's size and class.
pub fn build_data_volume(key: ObjectKey, disk: &DiskConfig, image: &str) -> DataVolume {
    DataVolume {
        key,
        spec: DataVolumeSpec {
            source: import_source(image),
            pvc: ClaimTemplate::new(&disk.size, &disk.storage_class_name),
        },
    }
}

/// HTTP(S) URLs are fetched directly, anything else is pulled from a registry.
pub fn import_source(image: &str) -> ImportSource {
    if image.starts_with("http://") || image.starts_with("https://") {
        return ImportSource::Http {
            url: image.to_string(),
        };
    }
    let url = if image.starts_with("docker://") {
        image.to_string()
    } else {
        format!("docker://{image}")
    };
    ImportSource::Registry {
        url,
        pull_method: REGISTRY_PULL_METHOD.to_string(),
    }
}

fn pending_volume(disk: &DiskConfig, pvc_name: String) -> VolumeStatus {
    VolumeStatus {
        name: disk.name.clone(),
        pvc_name,
        bound: false,
        schedulable: false,
        size: Some(disk.size.clone()),
        requested_size: Some(disk.size.clone()),
    }
}

/// Imports must have finished before their claim counts as bound. A pending
/// claim on a late-binding class is schedulable without being bound.
fn volume_status(
    disk: &DiskConfig,
    pvc_name: String,
    import_phase: Option<&DataVolumePhase>,
    claim: &ClaimObservation,
    late_binding: bool,
) -> VolumeStatus {
    let claim_bound = claim.phase == ClaimPhase::Bound;
    let bound = match import_phase {
        Some(phase) => claim_bound && *phase == DataVolumePhase::Succeeded,
        None => claim_bound,
    };
    let schedulable = bound || late_binding || import_phase == Some(&DataVolumePhase::WaitForFirstConsumer);

    VolumeStatus {
        name: disk.name.clone(),
        pvc_name,
        bound,
        schedulable,
        size: claim.capacity.clone().or_else(|| Some(disk.size.clone())),
        requested_size: Some(disk.size.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_source_by_scheme() {
        assert_eq!(
            import_source("https://images.example.com/jammy.qcow2"),
            ImportSource::Http {
                url: "https://images.example.com/jammy.qcow2".to_string()
            }
        );
        assert_eq!(
            import_source("docker://example/os:latest"),
            ImportSource::Registry {
                url: "docker://example/os:latest".to_string(),
                pull_method: "pod".to_string()
            }
        );
        assert_eq!(
            import_source("quay.io/containerdisks/fedora:40"),
            ImportSource::Registry {
                url: "docker://quay.io/containerdisks/fedora:40".to_string(),
                pull_method: "pod".to_string()
            }
        );
    }
}
