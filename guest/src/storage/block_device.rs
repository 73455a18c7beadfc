//! Block device mount helper.
//!
//! Mounts hotplugged virtio-blk disks. The descriptor names the disk by its
//! PCI slot chain (e.g. `02/03`); the device node is found through the PCI
//! topology and the sandbox device table.

use std::path::Path;

use agent_shared::StorageDescriptor;

use super::error::StorageResult;
use super::mount::{create_mount_dir, mount};
use super::pci::resolve_device;
use super::registry::HandlerContext;

#[derive(Debug)]
pub struct VirtioBlkStorage<'a> {
    pci_chain: &'a str,
    mount_point: &'a str,
    fs_type: &'a str,
    options: &'a [String],
}

impl<'a> VirtioBlkStorage<'a> {
    pub fn new(desc: &'a StorageDescriptor) -> StorageResult<Self> {
        Ok(Self {
            pci_chain: &desc.source,
            mount_point: super::require_mount_point(desc)?,
            fs_type: &desc.fs_type,
            options: &desc.options,
        })
    }

    /// Resolve the device node and mount it.
    ///
    /// Nothing is created or mounted if the device cannot be resolved.
    pub fn attach(&self, ctx: &HandlerContext<'_>) -> StorageResult<String> {
        let device = resolve_device(ctx.topology, ctx.sandbox, self.pci_chain)?;

        tracing::info!(
            "Mounting block device: {} ({}) → {} (type={})",
            device,
            self.pci_chain,
            self.mount_point,
            self.fs_type
        );

        create_mount_dir(Path::new(self.mount_point), ctx.config.mount_dir_mode)?;
        let (flags, data) = ctx.config.flags.translate(self.options);
        mount(&device, self.mount_point, self.fs_type, flags, &data)?;

        tracing::info!("Mounted block device: {} → {}", device, self.mount_point);
        Ok(self.mount_point.to_string())
    }
}
