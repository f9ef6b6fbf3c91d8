//! CDI DataVolumes, PersistentVolumeClaims and StorageClasses

use super::meta::{ObjectKey, ObservedOwner};
use serde::Serialize;

/// Access mode of every claim the controller requests.
pub const ACCESS_MODE: &str = "ReadWriteOnce";

/// Volume binding mode that defers binding until a pod is scheduled.
pub const WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";

/// Size and class of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTemplate {
    pub access_modes: Vec<String>,
    pub resources: ClaimResources,
    pub storage_class_name: String,
}

impl ClaimTemplate {
    /// `ReadWriteOnce` claim of `size` on `storage_class_name`.
    pub fn new(size: impl Into<String>, storage_class_name: impl Into<String>) -> Self {
        Self {
            access_modes: vec![ACCESS_MODE.to_string()],
            resources: ClaimResources {
                requests: StorageRequest {
                    storage: size.into(),
                },
            },
            storage_class_name: storage_class_name.into(),
        }
    }

    /// Requested size.
    #[must_use]
    pub fn size(&self) -> &str {
        &self.resources.requests.storage
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimResources {
    pub requests: StorageRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageRequest {
    pub storage: String,
}

/// A bare PersistentVolumeClaim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub key: ObjectKey,
    pub template: ClaimTemplate,
}

/// A CDI DataVolume (`cdi.kubevirt.io/v1beta1`) importing an image into a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataVolume {
    pub key: ObjectKey,
    pub spec: DataVolumeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataVolumeSpec {
    pub source: ImportSource,
    pub pvc: ClaimTemplate,
}

/// Where CDI fetches the image from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportSource {
    Http {
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    Registry {
        url: String,
        pull_method: String,
    },
}

/// Lifecycle phase reported in `DataVolume.status.phase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataVolumePhase {
    Succeeded,
    Failed,
    WaitForFirstConsumer,
    InProgress(String),
    Unknown,
}

impl DataVolumePhase {
    /// Parses the raw status value.
    #[must_use]
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Succeeded") => Self::Succeeded,
            Some("Failed" | "Error") => Self::Failed,
            Some("WaitForFirstConsumer" | "PendingPopulation") => Self::WaitForFirstConsumer,
            Some("" | "Unknown") | None => Self::Unknown,
            Some(other) => Self::InProgress(other.to_string()),
        }
    }
}

/// What the controller needs from an existing DataVolume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataVolumeObservation {
    pub phase: DataVolumePhase,
    pub progress: Option<String>,
}

/// Phase reported in `PersistentVolumeClaim.status.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

impl ClaimPhase {
    /// Parses the raw status value; unknown values count as pending.
    #[must_use]
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Bound") => Self::Bound,
            Some("Lost") => Self::Lost,
            _ => Self::Pending,
        }
    }
}

/// What the controller needs from an existing PersistentVolumeClaim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimObservation {
    pub phase: ClaimPhase,
    pub storage_class_name: Option<String>,
    pub requested: Option<String>,
    pub capacity: Option<String>,
    pub owners: Vec<ObservedOwner>,
}

/// What the controller needs from a StorageClass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageClassInfo {
    pub volume_binding_mode: Option<String>,
    pub allow_volume_expansion: bool,
}

impl StorageClassInfo {
    /// Whether claims on this class stay pending until a consumer is scheduled.
    #[must_use]
    pub fn waits_for_first_consumer(&self) -> bool {
        self.volume_binding_mode.as_deref() == Some(WAIT_FOR_FIRST_CONSUMER)
    }
}
