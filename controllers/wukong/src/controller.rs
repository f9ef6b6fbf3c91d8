//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler to
//! its watchers and to the health and metrics server:
//! - Wukong: a virtual machine with its networks, disks and guest config
//! - WukongSnapshot: a point-in-time snapshot of a Wukong

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{self, ServerState};
use crate::watcher::Watcher;
use cluster_client::KubeClusterClient;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for Wukong resource management.
pub struct Controller {
    wukong_watcher: JoinHandle<Result<(), ControllerError>>,
    wukong_snapshot_watcher: JoinHandle<Result<(), ControllerError>>,
    server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates the Kubernetes client and starts the watchers and the
    /// health server.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        let kube_client = Client::try_default().await?;

        let metrics = Metrics::new()?;
        let reconciler = Arc::new(Reconciler::new(
            KubeClusterClient::new(kube_client.clone()),
            config.step_timeout,
            metrics.clone(),
        ));

        let server_state = ServerState::new(metrics);
        let metrics_addr = config.metrics_addr;
        let server = {
            let state = server_state.clone();
            tokio::spawn(async move { server::serve(metrics_addr, state).await })
        };

        let watcher = Arc::new(Watcher::new(reconciler, kube_client, config));

        let wukong_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_wukongs().await })
        };
        let wukong_snapshot_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_wukong_snapshots().await })
        };

        server_state.mark_ready();
        info!("Watchers started");

        Ok(Self {
            wukong_watcher,
            wukong_snapshot_watcher,
            server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Wukong Controller running");

        // Wait for any task to exit (they should run forever)
        tokio::select! {
            result = &mut self.wukong_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Wukong watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Wukong watcher error: {}", e)))?;
            }
            result = &mut self.wukong_snapshot_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("WukongSnapshot watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("WukongSnapshot watcher error: {}", e)))?;
            }
            result = &mut self.server => {
                result.map_err(|e| ControllerError::Watch(format!("Health server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
