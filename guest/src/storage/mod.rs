//! Storage attachment (volume mounting).
//!
//! Turns host-supplied storage descriptors into mounted filesystems:
//! - Ephemeral: tmpfs created in the guest
//! - Local: plain guest directory
//! - 9p: share exported by the host over virtio 9p
//! - Block devices: hotplugged virtio-blk disks located through the PCI topology

pub mod block_device;
pub mod ephemeral;
pub mod error;
pub mod local;
pub mod mount;
pub mod options;
pub mod orchestrator;
pub mod pci;
pub mod registry;
pub mod virtio9p;

pub use error::{BatchFailure, StorageError, StorageResult};
pub use options::FlagTable;
pub use orchestrator::StorageOrchestrator;
pub use registry::{Handler, HandlerContext, HandlerRegistry, StorageHandler};

use agent_shared::StorageDescriptor;

use block_device::VirtioBlkStorage;
use ephemeral::EphemeralStorage;
use local::LocalStorage;
use virtio9p::Virtio9pStorage;

/// Which handler produced a mount; decides how it is torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Ephemeral,
    Local,
    Virtio9p,
    VirtioBlk,
    /// Produced by a handler registered from outside this crate.
    External,
}

impl StorageKind {
    /// Whether the storage is a kernel mount that must be unmounted on release.
    pub fn is_kernel_mount(self) -> bool {
        !matches!(self, StorageKind::Local)
    }
}

/// A descriptor interpreted by one of the built-in handlers, carrying only
/// the fields that handler uses.
#[derive(Debug)]
pub enum Storage<'a> {
    Ephemeral(EphemeralStorage<'a>),
    Local(LocalStorage<'a>),
    Virtio9p(Virtio9pStorage<'a>),
    VirtioBlk(VirtioBlkStorage<'a>),
}

impl Storage<'_> {
    /// Create the storage and return its mount point.
    pub fn attach(&self, ctx: &HandlerContext<'_>) -> StorageResult<String> {
        match self {
            Storage::Ephemeral(s) => s.attach(ctx),
            Storage::Local(s) => s.attach(ctx),
            Storage::Virtio9p(s) => s.attach(ctx),
            Storage::VirtioBlk(s) => s.attach(ctx),
        }
    }
}

fn require_mount_point(desc: &StorageDescriptor) -> StorageResult<&str> {
    if desc.mount_point.is_empty() {
        return Err(StorageError::invalid(format!(
            "{} storage has no mount point",
            desc.driver
        )));
    }
    Ok(&desc.mount_point)
}
