//! Driver-tag to handler registry.
//!
//! The built-in drivers are plain enum variants dispatched by pattern
//! matching; [`StorageHandler`] exists for drivers supplied from outside.
//! A registry is built once and handed to the orchestrator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use agent_shared::constants::drivers;
use agent_shared::StorageDescriptor;

use super::block_device::VirtioBlkStorage;
use super::ephemeral::EphemeralStorage;
use super::error::StorageResult;
use super::local::LocalStorage;
use super::pci::PciTopology;
use super::virtio9p::Virtio9pStorage;
use super::{Storage, StorageKind};
use crate::config::StorageConfig;
use crate::sandbox::Sandbox;

/// Everything a handler may use besides the descriptor itself.
pub struct HandlerContext<'a> {
    pub sandbox: &'a Sandbox,
    pub config: &'a StorageConfig,
    pub topology: &'a dyn PciTopology,
}

/// Storage driver implemented outside the built-in set.
///
/// The returned mount point is recorded in the sandbox and unmounted when its
/// last reference is released; returning an empty string records nothing.
pub trait StorageHandler: Send + Sync {
    fn attach(&self, storage: &StorageDescriptor, ctx: &HandlerContext<'_>)
        -> StorageResult<String>;
}

#[derive(Clone)]
pub enum Handler {
    Ephemeral,
    Local,
    Virtio9p,
    VirtioBlk,
    External(Arc<dyn StorageHandler>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::External(_) => f.write_str("External(..)"),
            builtin => write!(f, "{:?}", builtin.kind()),
        }
    }
}

impl Handler {
    pub fn kind(&self) -> StorageKind {
        match self {
            Handler::Ephemeral => StorageKind::Ephemeral,
            Handler::Local => StorageKind::Local,
            Handler::Virtio9p => StorageKind::Virtio9p,
            Handler::VirtioBlk => StorageKind::VirtioBlk,
            Handler::External(_) => StorageKind::External,
        }
    }

    /// Run the handler for `desc`.
    pub fn attach(
        &self,
        desc: &StorageDescriptor,
        ctx: &HandlerContext<'_>,
    ) -> StorageResult<String> {
        let storage = match self {
            Handler::Ephemeral => Storage::Ephemeral(EphemeralStorage::new(desc)?),
            Handler::Local => Storage::Local(LocalStorage::new(desc)?),
            Handler::Virtio9p => Storage::Virtio9p(Virtio9pStorage::new(desc)?),
            Handler::VirtioBlk => Storage::VirtioBlk(VirtioBlkStorage::new(desc)?),
            Handler::External(handler) => return handler.attach(desc, ctx),
        };
        storage.attach(ctx)
    }
}

/// Mapping from driver tag to handler.
#[derive(Clone, Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl Default for HandlerRegistry {
    /// Registry with the four built-in drivers.
    fn default() -> Self {
        Self::empty()
            .with(drivers::EPHEMERAL, Handler::Ephemeral)
            .with(drivers::LOCAL, Handler::Local)
            .with(drivers::VIRTIO_9P, Handler::Virtio9p)
            .with(drivers::VIRTIO_BLK, Handler::VirtioBlk)
    }
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under `driver`, replacing any previous entry.
    pub fn with(mut self, driver: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(driver.into(), handler);
        self
    }

    pub fn with_external(
        self,
        driver: impl Into<String>,
        handler: impl StorageHandler + 'static,
    ) -> Self {
        self.with(driver, Handler::External(Arc::new(handler)))
    }

    pub fn get(&self, driver: &str) -> Option<&Handler> {
        self.handlers.get(driver)
    }
}
