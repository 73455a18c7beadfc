//! Ephemeral storage.
//!
//! A tmpfs created inside the guest; the descriptor's source and fs type are
//! ignored.

use std::path::Path;

use agent_shared::constants::fs_types;
use agent_shared::StorageDescriptor;

use super::error::StorageResult;
use super::mount::{create_mount_dir, mount};
use super::registry::HandlerContext;

#[derive(Debug)]
pub struct EphemeralStorage<'a> {
    mount_point: &'a str,
    options: &'a [String],
}

impl<'a> EphemeralStorage<'a> {
    pub fn new(desc: &'a StorageDescriptor) -> StorageResult<Self> {
        Ok(Self {
            mount_point: super::require_mount_point(desc)?,
            options: &desc.options,
        })
    }

    pub fn attach(&self, ctx: &HandlerContext<'_>) -> StorageResult<String> {
        tracing::info!("Creating ephemeral storage at {}", self.mount_point);

        create_mount_dir(Path::new(self.mount_point), ctx.config.mount_dir_mode)?;
        let (flags, data) = ctx.config.flags.translate(self.options);
        mount(fs_types::TMPFS, self.mount_point, fs_types::TMPFS, flags, &data)?;

        Ok(self.mount_point.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::sandbox::Sandbox;
    use crate::storage::pci::SysfsTopology;
    use crate::storage::test_utils::{is_mount_point, require_mount};
    use crate::storage::StorageError;
    use tempfile::TempDir;

    fn descriptor(mount_point: &str) -> StorageDescriptor {
        StorageDescriptor {
            driver: "ephemeral".into(),
            source: "ignored".into(),
            mount_point: mount_point.into(),
            fs_type: "ext4".into(),
            options: vec!["nosuid".into(), "size=1m".into()],
        }
    }

    #[test]
    fn test_requires_mount_point() {
        let err = EphemeralStorage::new(&descriptor("")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_ephemeral_mount() {
        require_mount!();

        let tmp = TempDir::new().unwrap();
        let mount_point = tmp.path().join("shm");
        let desc = descriptor(mount_point.to_str().unwrap());
        let (sandbox, config) = (Sandbox::new(), StorageConfig::default());
        let topology = SysfsTopology::new(&config.sysfs_root);
        let ctx = HandlerContext {
            sandbox: &sandbox,
            config: &config,
            topology: &topology,
        };

        let mounted = EphemeralStorage::new(&desc).unwrap().attach(&ctx).unwrap();
        assert_eq!(mounted, desc.mount_point);
        assert!(is_mount_point(&mount_point));

        crate::storage::mount::unmount(&mounted).unwrap();
    }
}
