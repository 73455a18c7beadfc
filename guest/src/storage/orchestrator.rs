//! Batch attach and detach of storages.
//!
//! Descriptors are processed strictly in order. The first failure stops the
//! batch; the mount points attached before it are handed back so the caller
//! can unwind them. No rollback happens here.

use agent_shared::StorageDescriptor;

use super::error::{BatchFailure, StorageError, StorageResult};
use super::mount::unmount;
use super::pci::{PciTopology, SysfsTopology};
use super::registry::{HandlerContext, HandlerRegistry};
use crate::config::StorageConfig;
use crate::sandbox::{Claim, Detach, Sandbox};

pub struct StorageOrchestrator {
    registry: HandlerRegistry,
    config: StorageConfig,
    topology: Box<dyn PciTopology + Send + Sync>,
}

impl StorageOrchestrator {
    /// Orchestrator reading the PCI topology from `config.sysfs_root`.
    pub fn new(registry: HandlerRegistry, config: StorageConfig) -> Self {
        let topology = SysfsTopology::new(&config.sysfs_root);
        Self::with_topology(registry, config, topology)
    }

    pub fn with_topology(
        registry: HandlerRegistry,
        config: StorageConfig,
        topology: impl PciTopology + Send + Sync + 'static,
    ) -> Self {
        Self {
            registry,
            config,
            topology: Box::new(topology),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Attach every present descriptor, in order.
    ///
    /// Absent slots are skipped. A mount point that is already attached gets
    /// another reference instead of a second mount. Returns the mount points
    /// in batch order.
    pub fn add_storages(
        &self,
        descriptors: &[Option<StorageDescriptor>],
        sandbox: &Sandbox,
    ) -> Result<Vec<String>, BatchFailure> {
        let mut mounted = Vec::with_capacity(descriptors.len());
        let ctx = HandlerContext {
            sandbox,
            config: &self.config,
            topology: self.topology.as_ref(),
        };

        for (index, desc) in descriptors.iter().enumerate() {
            let Some(desc) = desc else {
                tracing::warn!("Skipping absent storage #{}", index);
                continue;
            };

            let Some(handler) = self.registry.get(&desc.driver) else {
                let error = StorageError::UnknownDriver(desc.driver.clone());
                return Err(fail(index, desc, mounted, error));
            };

            // Held until the mount is recorded; dropping it on any early
            // exit lifts it.
            let reservation = if desc.mount_point.is_empty() {
                None
            } else {
                match sandbox.claim_storage(&desc.mount_point) {
                    Claim::Shared(count) => {
                        tracing::info!(
                            "Storage {} already attached, {} references",
                            desc.mount_point,
                            count
                        );
                        mounted.push(desc.mount_point.clone());
                        continue;
                    }
                    Claim::Reserved(reservation) => Some(reservation),
                }
            };

            let mount_point = match handler.attach(desc, &ctx) {
                Ok(mount_point) => mount_point,
                Err(error) => {
                    tracing::error!("Failed to attach storage #{}: {}", index, error);
                    return Err(fail(index, desc, mounted, error));
                }
            };

            if mount_point.is_empty() {
                tracing::debug!("Storage #{} ({}) produced no mount point", index, desc.driver);
                continue;
            }

            let count = match reservation {
                Some(reservation) => reservation.commit(&mount_point, handler.kind()),
                None => sandbox.with_tables(|t| t.add_storage(&mount_point, handler.kind())),
            };
            tracing::info!(
                "Attached {} storage at {} ({} references)",
                desc.driver,
                mount_point,
                count
            );
            mounted.push(mount_point);
        }

        Ok(mounted)
    }

    /// Drop one reference to each mount point, last attached first.
    ///
    /// A storage is torn down when its last reference goes away; if the
    /// unmount fails it stays recorded with one reference. Stops at the first
    /// error.
    pub fn remove_storages(
        &self,
        mount_points: &[String],
        sandbox: &Sandbox,
    ) -> StorageResult<()> {
        for mount_point in mount_points.iter().rev() {
            match sandbox.detach_storage(mount_point) {
                None => {
                    return Err(StorageError::not_found(format!(
                        "storage {} is not attached",
                        mount_point
                    )))
                }
                Some(Detach::Shared(count)) => {
                    tracing::debug!("Storage {} still has {} references", mount_point, count);
                }
                Some(Detach::Forgotten(kind)) => {
                    tracing::info!("Released {:?} storage {}", kind, mount_point);
                }
                Some(Detach::Teardown(teardown)) => {
                    tracing::debug!("Tearing down {:?} storage {}", teardown.kind(), mount_point);
                    teardown.run(unmount)?;
                }
            }
        }
        Ok(())
    }
}

fn fail(
    index: usize,
    desc: &StorageDescriptor,
    mounted: Vec<String>,
    error: StorageError,
) -> BatchFailure {
    BatchFailure {
        index,
        driver: desc.driver.clone(),
        mounted,
        error,
    }
}
