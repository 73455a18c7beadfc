//! Storage attach service.
//!
//! Runs batches on a blocking worker, unwinds partially attached batches and
//! retries when a block device has not been reported by the hotplug listener
//! yet.

use std::sync::Arc;

use agent_shared::{AgentError, AgentResult, StorageDescriptor};
use tracing::{info, warn};

use crate::sandbox::Sandbox;
use crate::storage::{BatchFailure, StorageOrchestrator};

#[derive(Clone)]
pub struct StorageService {
    orchestrator: Arc<StorageOrchestrator>,
    sandbox: Arc<Sandbox>,
}

impl StorageService {
    pub fn new(orchestrator: StorageOrchestrator, sandbox: Arc<Sandbox>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            sandbox,
        }
    }

    /// Attach a batch, retrying the whole batch while a device is missing.
    ///
    /// On failure nothing from the batch stays attached.
    pub async fn attach(
        &self,
        descriptors: Vec<Option<StorageDescriptor>>,
    ) -> AgentResult<Vec<String>> {
        let policy = self.orchestrator.config().retry.clone();
        let descriptors = Arc::new(descriptors);
        let mut attempt = 1;

        loop {
            let failure = match self.add_storages(descriptors.clone()).await? {
                Ok(mounted) => {
                    info!("Attached {} storages", mounted.len());
                    return Ok(mounted);
                }
                Err(failure) => failure,
            };

            if let Err(e) = self.detach(failure.mounted.clone()).await {
                warn!("Failed to unwind partially attached batch: {}", e);
            }

            if !failure.error.is_not_found() || attempt >= policy.attempts {
                return Err(failure.into());
            }

            warn!(
                "Attempt {}/{} failed, retrying in {:?}: {}",
                attempt,
                policy.attempts,
                policy.backoff(),
                failure
            );
            tokio::time::sleep(policy.backoff()).await;
            attempt += 1;
        }
    }

    /// Release one reference to each mount point.
    pub async fn detach(&self, mount_points: Vec<String>) -> AgentResult<()> {
        if mount_points.is_empty() {
            return Ok(());
        }
        let (orchestrator, sandbox) = (self.orchestrator.clone(), self.sandbox.clone());
        tokio::task::spawn_blocking(move || orchestrator.remove_storages(&mount_points, &sandbox))
            .await
            .map_err(|e| AgentError::Internal(format!("Detach worker failed: {}", e)))?
            .map_err(AgentError::from)
    }

    async fn add_storages(
        &self,
        descriptors: Arc<Vec<Option<StorageDescriptor>>>,
    ) -> AgentResult<Result<Vec<String>, BatchFailure>> {
        let (orchestrator, sandbox) = (self.orchestrator.clone(), self.sandbox.clone());
        tokio::task::spawn_blocking(move || orchestrator.add_storages(&descriptors, &sandbox))
            .await
            .map_err(|e| AgentError::Internal(format!("Attach worker failed: {}", e)))
    }
}
