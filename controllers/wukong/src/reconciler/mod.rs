//! Reconciliation logic for Wukong and WukongSnapshot.
//!
//! This module is organized by the artifact each part synthesizes:
//! - `network`: Multus attachments and NMState node bridges
//! - `storage`: claims, DataVolumes and expansion
//! - `cloud_init`: guest first-boot configuration
//! - `vm`: the KubeVirt VirtualMachine and guest state
//! - `wukong`: the instance state machine driving all of the above
//! - `deletion`: ordered teardown behind the finalizer
//! - `restore` and `snapshot`: point-in-time capture and restore

pub mod cloud_init;
pub mod conditions;
pub mod deletion;
pub mod names;
pub mod network;
pub mod restore;
pub mod snapshot;
pub mod storage;
pub mod vm;
pub mod wukong;

#[cfg(test)]
mod cloud_init_test;
#[cfg(test)]
mod network_test;
#[cfg(test)]
mod snapshot_test;
#[cfg(test)]
mod storage_test;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use cluster_client::ClusterClientTrait;
use crds::{Wukong, WukongStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Re-trigger right away, used after finalizer and Pending writes.
pub(crate) const REQUEUE_IMMEDIATELY: Duration = Duration::ZERO;
/// Spec rejected by validation
pub(crate) const RETRY_INVALID_SPEC: Duration = Duration::from_secs(60);
/// Synthesis or guest failure
pub(crate) const RETRY_FAILED: Duration = Duration::from_secs(30);
/// Cancellation and not-found races
pub(crate) const RETRY_TRANSIENT: Duration = Duration::from_secs(10);
/// Volumes binding, guest booting, snapshot pending
pub(crate) const RETRY_PENDING: Duration = Duration::from_secs(10);
/// Snapshot or restore object just created
pub(crate) const RETRY_SNAPSHOT: Duration = Duration::from_secs(5);
/// Running guest that has not reported all of its addresses yet
pub(crate) const REFRESH_GUEST_FACTS: Duration = Duration::from_secs(60);
/// Each teardown step
pub(crate) const RETRY_DELETION: Duration = Duration::from_secs(2);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles Wukong and WukongSnapshot resources.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClientTrait + Send + Sync>,
    /// Upper bound for each synthesis step
    pub(crate) step_timeout: Duration,
    pub(crate) metrics: Metrics,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("step_timeout", &self.step_timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: impl ClusterClientTrait + Send + Sync + 'static,
        step_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            client: Box::new(client),
            step_timeout,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Writes `next` as the instance status unless it equals `previous`.
    ///
    /// The write is guarded by the resourceVersion the pass started from, so
    /// a concurrent writer makes the whole pass fail and be retried.
    pub(crate) async fn write_status(
        &self,
        wukong: &Wukong,
        previous: Option<&WukongStatus>,
        next: &WukongStatus,
    ) -> Result<(), ControllerError> {
        let (namespace, name) = crate::reconcile_helpers::object_ref(wukong)?;
        if previous == Some(next) {
            debug!("Status of Wukong {}/{} unchanged, skipping write", namespace, name);
            return Ok(());
        }

        self.client
            .patch_wukong_status(
                &namespace,
                &name,
                wukong.metadata.resource_version.as_deref(),
                next,
            )
            .await?;

        let previous_phase = previous.and_then(|s| s.phase);
        if let Some(phase) = next.phase.filter(|p| Some(*p) != previous_phase) {
            self.metrics.observe_phase(&phase.to_string());
        }
        Ok(())
    }

    /// Get the Fibonacci backoff for a resource and count the error
    ///
    /// Returns (backoff, error_count)
    pub fn next_backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.increment_error();
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (RETRY_FAILED, 0)
            }
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_reconciler;
    use cluster_client::MockClusterClient;

    #[test]
    fn test_backoff_grows_and_resets_per_resource() {
        let reconciler = create_test_reconciler(MockClusterClient::new());

        assert_eq!(reconciler.next_backoff_for_resource("Wukong/default/vm1"), (Duration::from_secs(5), 1));
        assert_eq!(reconciler.next_backoff_for_resource("Wukong/default/vm1"), (Duration::from_secs(5), 2));
        assert_eq!(reconciler.next_backoff_for_resource("Wukong/default/vm1"), (Duration::from_secs(10), 3));
        // Other objects keep their own sequence
        assert_eq!(reconciler.next_backoff_for_resource("Wukong/default/vm2"), (Duration::from_secs(5), 1));

        reconciler.reset_error("Wukong/default/vm1");
        assert_eq!(reconciler.next_backoff_for_resource("Wukong/default/vm1"), (Duration::from_secs(5), 1));
    }
}
