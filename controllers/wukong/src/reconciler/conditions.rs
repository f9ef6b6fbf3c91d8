//! Status conditions of a Wukong.

use chrono::{DateTime, Utc};
use crds::{Condition, ConditionStatus, NetworkConfig, NetworkStatus, VolumeStatus};

pub const READY: &str = "Ready";
pub const NETWORKS_CONFIGURED: &str = "NetworksConfigured";
pub const VOLUMES_BOUND: &str = "VolumesBound";

/// Sets a condition, keeping `lastTransitionTime` when the status is unchanged.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let message = message.into();
    match conditions.iter_mut().find(|c| c.type_ == condition_type) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message;
        }
        None => conditions.push(Condition {
            type_: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message,
            last_transition_time: now,
        }),
    }
}

/// `NetworksConfigured`: every declared secondary network resolved to an attachment.
pub fn set_networks_condition(
    conditions: &mut Vec<Condition>,
    declared: &[NetworkConfig],
    resolved: &[NetworkStatus],
    now: DateTime<Utc>,
) {
    let missing: Vec<&str> = declared
        .iter()
        .filter(|n| !n.is_default())
        .filter(|n| {
            !resolved
                .iter()
                .any(|r| r.name == n.name && r.nad_name.is_some())
        })
        .map(|n| n.name.as_str())
        .collect();

    if missing.is_empty() {
        set_condition(conditions, NETWORKS_CONFIGURED, ConditionStatus::True, "NetworksReady", "", now);
    } else {
        set_condition(
            conditions,
            NETWORKS_CONFIGURED,
            ConditionStatus::False,
            "AttachmentUnavailable",
            format!("no attachment for networks: {}", missing.join(", ")),
            now,
        );
    }
}

/// `VolumesBound`: every disk's claim is bound.
///
/// Late-binding claims are schedulable but not bound, so they hold this
/// condition at `False` until the guest is scheduled.
pub fn set_volumes_condition(conditions: &mut Vec<Condition>, volumes: &[VolumeStatus], now: DateTime<Utc>) {
    let pending: Vec<&str> = volumes
        .iter()
        .filter(|v| !v.bound)
        .map(|v| v.name.as_str())
        .collect();

    if pending.is_empty() {
        set_condition(conditions, VOLUMES_BOUND, ConditionStatus::True, "VolumesReady", "", now);
    } else {
        set_condition(
            conditions,
            VOLUMES_BOUND,
            ConditionStatus::False,
            "VolumesPending",
            format!("waiting for volumes: {}", pending.join(", ")),
            now,
        );
    }
}
