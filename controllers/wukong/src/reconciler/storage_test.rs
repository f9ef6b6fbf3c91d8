//! Unit tests for the storage synthesizer

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use cluster_client::{
        ClaimObservation, ClaimPhase, DataVolumePhase, ImportSource, MockClusterClient, ObservedOwner,
        StorageClassInfo,
    };

    fn bound_claim(size: &str) -> ClaimObservation {
        ClaimObservation {
            phase: ClaimPhase::Bound,
            storage_class_name: Some("standard".to_string()),
            requested: Some(size.to_string()),
            capacity: Some(size.to_string()),
            owners: vec![ObservedOwner {
                kind: "Wukong".to_string(),
                name: "vm1".to_string(),
                uid: "uid-vm1".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_bare_disk_creates_claim_once() {
        let mock = MockClusterClient::new();
        let reconciler = create_test_reconciler(mock.clone());
        let wukong = create_test_wukong_with_finalizer("vm1", "default");

        let volumes = reconciler.synthesize_storage(&wukong).await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].pvc_name, "vm1-root");
        assert!(!volumes[0].bound);
        assert!(!volumes[0].schedulable);
        assert_eq!(mock.calls(), vec!["create_claim vm1-root".to_string()]);

        let claim = mock.claim("default", "vm1-root").unwrap();
        assert_eq!(claim.requested.as_deref(), Some("20Gi"));
        assert_eq!(claim.owners[0].uid, "uid-vm1");

        mock.clear_calls();
        reconciler.synthesize_storage(&wukong).await.unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_image_disk_imports_through_data_volume() {
        let mock = MockClusterClient::new();
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.disks[0].image = Some("docker://example/os:latest".to_string());

        let volumes = reconciler.synthesize_storage(&wukong).await.unwrap();
        assert_eq!(mock.call_count("create_data_volume"), 1);
        assert_eq!(mock.call_count("create_claim"), 0);

        let data_volume = mock.data_volume("default", "vm1-root").unwrap();
        assert_eq!(data_volume.key.name, volumes[0].pvc_name);
        assert_eq!(
            data_volume.spec.source,
            ImportSource::Registry {
                url: "docker://example/os:latest".to_string(),
                pull_method: "pod".to_string(),
            }
        );
        assert_eq!(data_volume.spec.pvc.size(), "20Gi");

        // Claim bound while the import still runs
        mock.set_claim_phase("default", "vm1-root", ClaimPhase::Bound);
        let volumes = reconciler.synthesize_storage(&wukong).await.unwrap();
        assert!(!volumes[0].bound);

        mock.set_data_volume_phase("default", "vm1-root", DataVolumePhase::Succeeded);
        let volumes = reconciler.synthesize_storage(&wukong).await.unwrap();
        assert!(volumes[0].bound);
        assert!(volumes[0].schedulable);
        assert_eq!(mock.call_count("create_data_volume"), 1);
    }

    #[tokio::test]
    async fn test_failed_import_is_a_storage_failure() {
        let mock = MockClusterClient::new();
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.disks[0].image = Some("https://images.example.com/jammy.qcow2".to_string());

        reconciler.synthesize_storage(&wukong).await.unwrap();
        mock.set_data_volume_phase("default", "vm1-root", DataVolumePhase::Failed);

        let result = reconciler.synthesize_storage(&wukong).await;
        assert!(matches!(result, Err(ControllerError::StorageFailed { ref disk, .. }) if disk == "root"));
    }

    #[tokio::test]
    async fn test_late_binding_claim_is_schedulable_but_not_bound() {
        let mock = MockClusterClient::new();
        mock.add_storage_class(
            "standard",
            StorageClassInfo {
                volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
                allow_volume_expansion: false,
            },
        );
        let reconciler = create_test_reconciler(mock.clone());
        let wukong = create_test_wukong_with_finalizer("vm1", "default");

        reconciler.synthesize_storage(&wukong).await.unwrap();
        let volumes = reconciler.synthesize_storage(&wukong).await.unwrap();
        assert!(volumes[0].schedulable);
        assert!(!volumes[0].bound);
    }

    #[tokio::test]
    async fn test_grow_expands_when_class_allows_it() {
        let mock = MockClusterClient::new();
        mock.add_storage_class("standard", immediate_storage_class(true));
        mock.add_claim("default", "vm1-root", bound_claim("20Gi"));
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.disks[0].size = "40Gi".to_string();

        reconciler.expand_volumes(&wukong).await;
        assert_eq!(mock.calls(), vec!["expand_claim vm1-root".to_string()]);
        assert_eq!(mock.claim("default", "vm1-root").unwrap().requested.as_deref(), Some("40Gi"));

        // Already requested, nothing more to do
        mock.clear_calls();
        reconciler.expand_volumes(&wukong).await;
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_grow_skipped_when_class_forbids_it() {
        let mock = MockClusterClient::new();
        mock.add_storage_class("standard", immediate_storage_class(false));
        mock.add_claim("default", "vm1-root", bound_claim("20Gi"));
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.disks[0].size = "40Gi".to_string();

        reconciler.expand_volumes(&wukong).await;
        assert_eq!(mock.call_count("expand_claim"), 0);

        // Reported size stays at the capacity, the request is recorded
        let volumes = reconciler.synthesize_storage(&wukong).await.unwrap();
        assert_eq!(volumes[0].size.as_deref(), Some("20Gi"));
        assert_eq!(volumes[0].requested_size.as_deref(), Some("40Gi"));
    }

    #[tokio::test]
    async fn test_expansion_skips_unbound_claims() {
        let mock = MockClusterClient::new();
        mock.add_storage_class("standard", immediate_storage_class(true));
        let mut claim = bound_claim("20Gi");
        claim.phase = ClaimPhase::Pending;
        claim.capacity = None;
        mock.add_claim("default", "vm1-root", claim);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.disks[0].size = "40Gi".to_string();

        reconciler.expand_volumes(&wukong).await;
        assert_eq!(mock.call_count("expand_claim"), 0);
    }
}
