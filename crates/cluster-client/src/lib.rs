//! Cluster client for the Wukong controller
//!
//! Typed access to every Kubernetes object the controller creates or
//! observes: Multus attachments, NMState policies, CDI DataVolumes,
//! claims, KubeVirt virtual machines, snapshots and restores.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//!
//! // Is Multus installed?
//! let multus = client.crd_exists(cluster_client::kinds::MULTUS_CRD).await?;
//!
//! // Observe a claim
//! let claim = client.get_claim("default", "vm1-root").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod kinds;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockFailure};
