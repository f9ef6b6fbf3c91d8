//! Unit tests for the WukongSnapshot reconciler

#[cfg(test)]
mod tests {
    use crate::reconciler::Reconciler;
    use crate::test_utils::*;
    use chrono::{TimeZone, Utc};
    use cluster_client::{MockClusterClient, SnapshotObservation};
    use crds::{SnapshotPhase, WukongSnapshotStatus, WukongStatus};
    use kube_runtime::controller::Action;
    use std::time::Duration;

    async fn reconcile(reconciler: &Reconciler, mock: &MockClusterClient) -> Action {
        let snapshot = mock.wukong_snapshot("default", "nightly").unwrap();
        reconciler.reconcile_wukong_snapshot(&snapshot).await.unwrap()
    }

    fn status(mock: &MockClusterClient) -> WukongSnapshotStatus {
        mock.wukong_snapshot("default", "nightly")
            .and_then(|s| s.status)
            .unwrap_or_default()
    }

    fn add_wukong_with_vm(mock: &MockClusterClient) {
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.status = Some(WukongStatus {
            vm_name: Some("vm1-vm".to_string()),
            ..Default::default()
        });
        mock.add_wukong(wukong);
    }

    #[tokio::test]
    async fn test_snapshot_succeeds() {
        let mock = MockClusterClient::new();
        add_wukong_with_vm(&mock);
        mock.add_wukong_snapshot(create_test_wukong_snapshot("nightly", "default", "vm1"));
        let reconciler = create_test_reconciler(mock.clone());

        let action = reconcile(&reconciler, &mock).await;
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        let vm_snapshot = mock.vm_snapshot("default", "nightly-vmsnapshot").unwrap();
        assert_eq!(vm_snapshot.spec.source.name, "vm1-vm");
        assert_eq!(vm_snapshot.spec.source.kind, "VirtualMachine");
        assert_eq!(vm_snapshot.key.owner.unwrap().uid, "uid-nightly");
        assert_eq!(status(&mock).phase, Some(SnapshotPhase::Creating));
        assert_eq!(status(&mock).snapshot_name.as_deref(), Some("nightly-vmsnapshot"));

        // Not ready yet: nothing to write
        mock.clear_calls();
        let action = reconcile(&reconciler, &mock).await;
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert!(mock.calls().is_empty());

        let created = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        mock.set_snapshot_state(
            "default",
            "nightly-vmsnapshot",
            SnapshotObservation {
                ready_to_use: true,
                phase: Some("Succeeded".to_string()),
                creation_time: Some(created),
                error: None,
            },
        );
        let action = reconcile(&reconciler, &mock).await;
        assert_eq!(action, Action::await_change());
        assert_eq!(status(&mock).phase, Some(SnapshotPhase::Succeeded));
        assert_eq!(status(&mock).creation_time, Some(created));

        // Terminal
        mock.clear_calls();
        assert_eq!(reconcile(&reconciler, &mock).await, Action::await_change());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_terminal() {
        let mock = MockClusterClient::new();
        add_wukong_with_vm(&mock);
        mock.add_wukong_snapshot(create_test_wukong_snapshot("nightly", "default", "vm1"));
        let reconciler = create_test_reconciler(mock.clone());
        reconcile(&reconciler, &mock).await;

        mock.set_snapshot_state(
            "default",
            "nightly-vmsnapshot",
            SnapshotObservation {
                phase: Some("Failed".to_string()),
                error: Some("volume not snapshottable".to_string()),
                ..Default::default()
            },
        );
        let action = reconcile(&reconciler, &mock).await;
        assert_eq!(action, Action::await_change());
        assert_eq!(status(&mock).phase, Some(SnapshotPhase::Failed));
        assert_eq!(status(&mock).error.as_deref(), Some("volume not snapshottable"));

        mock.clear_calls();
        reconcile(&reconciler, &mock).await;
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_wukong_fails_and_retries() {
        let mock = MockClusterClient::new();
        mock.add_wukong_snapshot(create_test_wukong_snapshot("nightly", "default", "vm1"));
        let reconciler = create_test_reconciler(mock.clone());

        let action = reconcile(&reconciler, &mock).await;
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        assert_eq!(status(&mock).phase, Some(SnapshotPhase::Failed));
        assert_eq!(status(&mock).error.as_deref(), Some("Wukong vm1 not found"));

        // Retried once the instance shows up
        add_wukong_with_vm(&mock);
        reconcile(&reconciler, &mock).await;
        assert_eq!(status(&mock).phase, Some(SnapshotPhase::Creating));
        assert_eq!(status(&mock).error, None);
    }

    #[tokio::test]
    async fn test_waits_for_virtual_machine() {
        let mock = MockClusterClient::new();
        mock.add_wukong(create_test_wukong_with_finalizer("vm1", "default"));
        mock.add_wukong_snapshot(create_test_wukong_snapshot("nightly", "default", "vm1"));
        let reconciler = create_test_reconciler(mock.clone());

        let action = reconcile(&reconciler, &mock).await;
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert_eq!(status(&mock).phase, Some(SnapshotPhase::Pending));
        assert_eq!(mock.call_count("create_vm_snapshot"), 0);
    }
}
