//! 9p mount helper.
//!
//! Mounts a share the host exports over virtio 9p (or any source already
//! visible in the guest) at the requested mount point.

use std::path::Path;

use agent_shared::StorageDescriptor;

use super::error::StorageResult;
use super::mount::{create_mount_dir, mount};
use super::registry::HandlerContext;

#[derive(Debug)]
pub struct Virtio9pStorage<'a> {
    source: &'a str,
    mount_point: &'a str,
    fs_type: &'a str,
    options: &'a [String],
}

impl<'a> Virtio9pStorage<'a> {
    pub fn new(desc: &'a StorageDescriptor) -> StorageResult<Self> {
        Ok(Self {
            source: &desc.source,
            mount_point: super::require_mount_point(desc)?,
            fs_type: &desc.fs_type,
            options: &desc.options,
        })
    }

    /// Mount the share at the mount point.
    pub fn attach(&self, ctx: &HandlerContext<'_>) -> StorageResult<String> {
        tracing::info!("Mounting 9p share: {} → {}", self.source, self.mount_point);

        create_mount_dir(Path::new(self.mount_point), ctx.config.mount_dir_mode)?;
        let (flags, data) = ctx.config.flags.translate(self.options);
        mount(self.source, self.mount_point, self.fs_type, flags, &data)?;

        tracing::info!("Mounted 9p share: {} → {}", self.source, self.mount_point);
        Ok(self.mount_point.to_string())
    }
}
