//! Wukong reconciler
//!
//! One pass of the instance state machine:
//!
//! 1. deletion timestamp set: ordered teardown (see `deletion`)
//! 2. no finalizer: add it and requeue
//! 3. spec or update rejected: `Error`, retried after a minute
//! 4. no phase: `Pending` and requeue
//! 5. networks, then storage; wait while any volume cannot be scheduled
//! 6. best-effort disk expansion
//! 7. restore, cloud-init and the VirtualMachine
//! 8. guest state mapped to the phase, guest facts merged into the status
//!
//! Status is written at most once per pass and only when it changed.

use super::conditions::{self, READY};
use super::names;
use super::restore::RestoreStep;
use super::vm::{self, GuestState, VmInputs};
use super::{
    REFRESH_GUEST_FACTS, REQUEUE_IMMEDIATELY, RETRY_FAILED, RETRY_INVALID_SPEC, RETRY_PENDING, RETRY_TRANSIENT, Reconciler,
};
use crate::error::ControllerError;
use crate::reconcile_helpers::{finalizers_with, has_finalizer, object_ref, owner_ref, with_timeout};
use chrono::Utc;
use cluster_client::ObjectKey;
use crds::{
    ConditionStatus, RunStrategy, WUKONG_FINALIZER, Wukong, WukongPhase, WukongStatus, validate_spec, validate_update,
};
use kube_runtime::controller::Action;
use tracing::{Instrument, debug, info, info_span, warn};

impl Reconciler {
    pub async fn reconcile_wukong(&self, wukong: &Wukong) -> Result<Action, ControllerError> {
        let (namespace, name) = object_ref(wukong)?;
        let span = info_span!("reconcile_wukong", namespace = %namespace, name = %name);
        self.reconcile_wukong_pass(wukong).instrument(span).await
    }

    async fn reconcile_wukong_pass(&self, wukong: &Wukong) -> Result<Action, ControllerError> {
        let (namespace, name) = object_ref(wukong)?;

        if wukong.metadata.deletion_timestamp.is_some() {
            return self.reconcile_deletion(wukong).await;
        }

        if !has_finalizer(wukong, WUKONG_FINALIZER) {
            let finalizers = finalizers_with(wukong, WUKONG_FINALIZER);
            self.client
                .set_wukong_finalizers(&namespace, &name, wukong.metadata.resource_version.as_deref(), &finalizers)
                .await?;
            info!("Added finalizer to Wukong {}/{}", namespace, name);
            return Ok(Action::requeue(REQUEUE_IMMEDIATELY));
        }

        let previous = wukong.status.as_ref();
        let mut status = previous.cloned().unwrap_or_default();
        let now = Utc::now();

        if let Err(e) = validate_spec(&wukong.spec).and_then(|()| validate_update(&wukong.spec, &status)) {
            warn!("Rejecting spec of Wukong {}/{}: {}", namespace, name, e);
            status.phase = Some(WukongPhase::Error);
            status.message = Some(e.to_string());
            conditions::set_condition(&mut status.conditions, READY, ConditionStatus::False, "InvalidSpec", e.to_string(), now);
            self.write_status(wukong, previous, &status).await?;
            return Ok(Action::requeue(RETRY_INVALID_SPEC));
        }

        if status.phase.is_none() {
            status.phase = Some(WukongPhase::Pending);
            self.write_status(wukong, previous, &status).await?;
            info!("Wukong {}/{} is Pending", namespace, name);
            return Ok(Action::requeue(REQUEUE_IMMEDIATELY));
        }

        if !matches!(status.phase, Some(WukongPhase::Creating | WukongPhase::Running)) {
            status.phase = Some(WukongPhase::Creating);
        }

        let networks = with_timeout(
            self.step_timeout,
            "networks",
            self.synthesize_networks(wukong, &status.networks),
        )
        .await;
        let networks = match networks {
            Ok(networks) => networks,
            Err(e) => return self.fail_pass(wukong, status, e).await,
        };
        let volumes = with_timeout(self.step_timeout, "storage", self.synthesize_storage(wukong)).await;
        let volumes = match volumes {
            Ok(volumes) => volumes,
            Err(e) => return self.fail_pass(wukong, status, e).await,
        };

        status.networks = networks;
        status.volumes = volumes;
        conditions::set_networks_condition(&mut status.conditions, &wukong.spec.networks, &status.networks, now);
        conditions::set_volumes_condition(&mut status.conditions, &status.volumes, now);

        if !status.volumes.iter().all(|v| v.schedulable) {
            debug!("Wukong {}/{} waits for its volumes", namespace, name);
            status.message = None;
            conditions::set_condition(
                &mut status.conditions,
                READY,
                ConditionStatus::False,
                "VMNotReady",
                "waiting for volumes",
                now,
            );
            self.write_status(wukong, previous, &status).await?;
            return Ok(Action::requeue(RETRY_PENDING));
        }

        if tokio::time::timeout(self.step_timeout, self.expand_volumes(wukong)).await.is_err() {
            warn!("Disk expansion of Wukong {}/{} timed out, retrying next pass", namespace, name);
        }

        let restore = with_timeout(self.step_timeout, "restore", self.restore_step(wukong)).await;
        let restore = match restore {
            Ok(step) => step,
            Err(e) => return self.fail_pass(wukong, status, e).await,
        };
        let run_strategy = match &restore {
            RestoreStep::Waiting { .. } => RunStrategy::Halted,
            RestoreStep::Idle | RestoreStep::Completed(_) => vm::run_strategy(&wukong.spec),
        };
        if let RestoreStep::Completed(snapshot) = &restore {
            status.restored_from = Some(snapshot.clone());
        }

        let vm_name = names::vm_name(&name);
        let pod_interface = vm::uses_pod_interface(&wukong.spec, &status.networks);
        let applied = with_timeout(self.step_timeout, "virtual machine", async {
            let user_data: Option<String> = self.build_cloud_init(wukong, &status.networks, pod_interface).await?;
            let vm = vm::build_virtual_machine(VmInputs {
                key: ObjectKey::new(&namespace, &vm_name).owned_by(owner_ref(wukong)),
                instance: &name,
                spec: &wukong.spec,
                networks: &status.networks,
                volumes: &status.volumes,
                run_strategy,
                cloud_init: user_data.as_deref(),
            });
            self.apply_virtual_machine(&vm).await
        })
        .await;
        if let Err(e) = applied {
            return self.fail_pass(wukong, status, e).await;
        }
        status.vm_name = Some(vm_name.clone());
        status.applied_cpu = Some(wukong.spec.cpu);

        if let RestoreStep::Waiting { requeue, message } = restore {
            status.phase = Some(WukongPhase::Creating);
            status.message = None;
            status.node_name = None;
            conditions::set_condition(&mut status.conditions, READY, ConditionStatus::False, "Restoring", message, now);
            self.write_status(wukong, previous, &status).await?;
            return Ok(Action::requeue(requeue));
        }

        let instance = with_timeout(self.step_timeout, "guest state", async {
            let instance = self.client.get_virtual_machine_instance(&namespace, &vm_name).await?;
            Ok::<_, ControllerError>(instance)
        })
        .await;
        let instance = match instance {
            Ok(instance) => instance,
            Err(e) => return self.fail_pass(wukong, status, e).await,
        };
        status.node_name = instance.as_ref().and_then(|i| i.node_name.clone());

        let expect_running = wukong.spec.auto_start() && !matches!(run_strategy, RunStrategy::Halted | RunStrategy::Manual);
        let action = match vm::guest_state(instance.as_ref(), expect_running) {
            GuestState::Running => {
                if let Some(instance) = &instance {
                    vm::merge_instance_interfaces(&mut status.networks, instance);
                }
                status.phase = Some(WukongPhase::Running);
                status.message = None;
                conditions::set_condition(&mut status.conditions, READY, ConditionStatus::True, "VMRunning", "", now);
                let addresses_pending = status
                    .networks
                    .iter()
                    .any(|n| n.nad_name.is_some() && n.ip_address.is_none());
                if addresses_pending {
                    Action::requeue(REFRESH_GUEST_FACTS)
                } else {
                    Action::await_change()
                }
            }
            GuestState::Starting => {
                status.phase = Some(WukongPhase::Creating);
                status.message = None;
                conditions::set_condition(
                    &mut status.conditions,
                    READY,
                    ConditionStatus::False,
                    "VMCreating",
                    "guest is starting",
                    now,
                );
                Action::requeue(RETRY_PENDING)
            }
            GuestState::Stopped => {
                status.phase = Some(WukongPhase::Stopped);
                status.message = None;
                conditions::set_condition(&mut status.conditions, READY, ConditionStatus::False, "VMStopped", "", now);
                Action::await_change()
            }
            GuestState::Failed(reason) => {
                warn!("Guest of Wukong {}/{} failed: {}", namespace, name, reason);
                status.phase = Some(WukongPhase::Error);
                conditions::set_condition(&mut status.conditions, READY, ConditionStatus::False, "VMFailed", reason.as_str(), now);
                status.message = Some(reason);
                Action::requeue(RETRY_FAILED)
            }
        };

        self.write_status(wukong, previous, &status).await?;
        Ok(action)
    }

    /// Ends a pass after a failed step.
    ///
    /// Transient failures are retried quickly without touching the status.
    /// Anything else moves the instance to `Error`.
    async fn fail_pass(
        &self,
        wukong: &Wukong,
        mut status: WukongStatus,
        error: ControllerError,
    ) -> Result<Action, ControllerError> {
        let (namespace, name) = object_ref(wukong)?;
        if error.is_transient() {
            info!("Pass over Wukong {}/{} interrupted, retrying: {}", namespace, name, error);
            return Ok(Action::requeue(RETRY_TRANSIENT));
        }

        warn!("Reconciliation of Wukong {}/{} failed: {}", namespace, name, error);
        let message = error.to_string();
        status.phase = Some(WukongPhase::Error);
        status.message = Some(message.clone());
        conditions::set_condition(
            &mut status.conditions,
            READY,
            ConditionStatus::False,
            "ReconcileError",
            message,
            Utc::now(),
        );
        self.write_status(wukong, wukong.status.as_ref(), &status).await?;
        Ok(Action::requeue(RETRY_FAILED))
    }
}
