//! Unit tests for reconcile_helpers module

#[cfg(test)]
mod tests {
    use crate::reconcile_helpers::*;
    use crate::test_utils::*;
    use crds::WUKONG_FINALIZER;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_object_ref_defaults_namespace() {
        let mut wukong = create_test_wukong("vm1", "default");
        wukong.metadata.namespace = None;
        let (namespace, name) = object_ref(&wukong).unwrap();
        assert_eq!(namespace, "default");
        assert_eq!(name, "vm1");
    }

    #[test]
    fn test_object_ref_requires_name() {
        let mut wukong = create_test_wukong("vm1", "default");
        wukong.metadata.name = None;
        assert!(object_ref(&wukong).is_err());
    }

    #[test]
    fn test_owner_ref_needs_uid() {
        let mut wukong = create_test_wukong("vm1", "tenant-a");
        let owner = owner_ref(&wukong).unwrap();
        assert_eq!(owner.kind, "Wukong");
        assert_eq!(owner.api_version, "vm.novasphere.dev/v1alpha1");
        assert_eq!(owner.name, "vm1");

        wukong.metadata.uid = None;
        assert!(owner_ref(&wukong).is_none());
    }

    #[test]
    fn test_finalizer_lists() {
        let mut wukong = create_test_wukong("vm1", "default");
        assert!(!has_finalizer(&wukong, WUKONG_FINALIZER));

        wukong.metadata.finalizers = Some(vec!["other.io/keep".to_string()]);
        let with = finalizers_with(&wukong, WUKONG_FINALIZER);
        assert_eq!(with, vec!["other.io/keep".to_string(), WUKONG_FINALIZER.to_string()]);

        wukong.metadata.finalizers = Some(with);
        assert!(has_finalizer(&wukong, WUKONG_FINALIZER));
        assert_eq!(finalizers_with(&wukong, WUKONG_FINALIZER).len(), 2);
        assert_eq!(
            finalizers_without(&wukong, WUKONG_FINALIZER),
            vec!["other.io/keep".to_string()]
        );
    }

    #[test]
    fn test_spec_needs_update_ignores_server_defaults() {
        let desired = json!({
            "runStrategy": "Always",
            "template": {"spec": {"domain": {"cpu": {"cores": 2}}}}
        });
        let observed = json!({
            "runStrategy": "Always",
            "template": {"spec": {"domain": {"cpu": {"cores": 2, "model": "host-model"}, "machine": {"type": "q35"}}}}
        });
        assert!(!spec_needs_update(&desired, &observed));
    }

    #[test]
    fn test_spec_needs_update_detects_changes() {
        let observed = json!({"runStrategy": "Always", "disks": [{"name": "root"}]});
        assert!(spec_needs_update(&json!({"runStrategy": "Halted"}), &observed));
        assert!(spec_needs_update(&json!({"disks": [{"name": "root"}, {"name": "data"}]}), &observed));
        assert!(spec_needs_update(&json!({"nodeSelector": {"zone": "a"}}), &observed));
    }

    #[test]
    fn test_spec_needs_update_compares_numbers_by_value() {
        assert!(!spec_needs_update(&json!({"cores": 2}), &json!({"cores": 2.0})));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let value = with_timeout(Duration::from_secs(1), "noop", async { Ok::<_, crate::error::ControllerError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed_to_cancelled() {
        let result = with_timeout(Duration::from_millis(10), "storage", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, crate::error::ControllerError>(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("storage"));
    }
}
