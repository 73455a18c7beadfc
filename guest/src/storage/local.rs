//! Local storage.
//!
//! A directory in the guest shared between containers. Nothing is mounted;
//! the directory itself is the storage.

use std::path::Path;

use agent_shared::StorageDescriptor;

use super::error::StorageResult;
use super::mount::{create_mount_dir, parse_mode, set_mode};
use super::registry::HandlerContext;

#[derive(Debug)]
pub struct LocalStorage<'a> {
    mount_point: &'a str,
    mode: Option<&'a str>,
}

impl<'a> LocalStorage<'a> {
    pub fn new(desc: &'a StorageDescriptor) -> StorageResult<Self> {
        Ok(Self {
            mount_point: super::require_mount_point(desc)?,
            mode: desc.option_value("mode"),
        })
    }

    pub fn attach(&self, ctx: &HandlerContext<'_>) -> StorageResult<String> {
        // Validate before touching the filesystem.
        let mode = match self.mode {
            Some(mode) => parse_mode(mode)?,
            None => ctx.config.local_dir_mode,
        };

        let path = Path::new(self.mount_point);
        if create_mount_dir(path, mode)? {
            // create honours the umask; force the exact bits
            set_mode(path, mode)?;
            tracing::info!("Created local storage {} (mode {:o})", self.mount_point, mode);
        } else {
            tracing::debug!(
                "Local storage {} already exists, leaving its mode alone",
                self.mount_point
            );
        }

        Ok(self.mount_point.to_string())
    }
}
