//! Mount executor.
//!
//! Strict wrapper around mount(2) plus the directory helpers the storage
//! handlers share.

use std::fs::{self, DirBuilder};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use agent_shared::constants::fs_types;
use nix::mount::{MntFlags, MsFlags};

use super::error::{StorageError, StorageResult};

/// Mount `source` on `destination`.
///
/// `source`, `destination` and `fs_type` must all be non-empty. The
/// destination must already exist; this function creates nothing.
pub fn mount(
    source: &str,
    destination: &str,
    fs_type: &str,
    flags: MsFlags,
    options: &str,
) -> StorageResult<()> {
    if source.is_empty() {
        return Err(StorageError::invalid("mount source is empty"));
    }
    if destination.is_empty() {
        return Err(StorageError::invalid("mount destination is empty"));
    }
    if fs_type.is_empty() {
        return Err(StorageError::invalid("mount filesystem type is empty"));
    }

    let source = resolve_source(source, fs_type)?;

    tracing::info!(
        "Mounting {} → {} (type={}, flags={:?}, options={:?})",
        source.display(),
        destination,
        fs_type,
        flags,
        options
    );

    let data = (!options.is_empty()).then_some(options);
    nix::mount::mount(
        Some(source.as_path()),
        destination,
        Some(fs_type),
        flags,
        data,
    )
    .map_err(|e| {
        StorageError::handler(
            format!(
                "failed to mount {} to {} (type {})",
                source.display(),
                destination,
                fs_type
            ),
            e,
        )
    })?;

    tracing::info!("Mounted {} → {}", source.display(), destination);
    Ok(())
}

/// Pseudo filesystems take a keyword or tag as source; everything else is a
/// path whose symlinks are resolved before mounting.
fn resolve_source(source: &str, fs_type: &str) -> StorageResult<PathBuf> {
    if fs_types::PSEUDO.contains(&fs_type) {
        return Ok(PathBuf::from(source));
    }
    fs::canonicalize(source).map_err(|e| {
        StorageError::handler(format!("failed to resolve mount source {}", source), e)
    })
}

/// Unmount `target`.
pub fn unmount(target: &str) -> StorageResult<()> {
    tracing::info!("Unmounting {}", target);
    nix::mount::umount2(target, MntFlags::empty())
        .map_err(|e| StorageError::handler(format!("failed to unmount {}", target), e))
}

/// Parse an octal permission string such as `"0400"`.
pub fn parse_mode(mode: &str) -> StorageResult<u32> {
    let parsed = u32::from_str_radix(mode, 8)
        .map_err(|e| StorageError::invalid(format!("mode {:?} is not octal: {}", mode, e)))?;
    if parsed > 0o7777 {
        return Err(StorageError::invalid(format!(
            "mode {:?} has bits outside 07777",
            mode
        )));
    }
    Ok(parsed)
}

/// Set the exact permission bits of a directory, bypassing the umask.
///
/// Only used on directories a handler has just created.
pub fn set_mode(dir: &Path, mode: u32) -> StorageResult<()> {
    fs::set_permissions(dir, fs::Permissions::from_mode(mode)).map_err(|e| {
        StorageError::handler(
            format!("failed to set mode {:o} on {}", mode, dir.display()),
            e,
        )
    })?;
    tracing::debug!("Set mode {:o} on {}", mode, dir.display());
    Ok(())
}

/// Create `path` and any missing parents with `mode` (subject to umask).
///
/// Returns whether the final directory was created by this call.
pub fn create_mount_dir(path: &Path, mode: u32) -> StorageResult<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|e| {
            StorageError::handler(
                format!("failed to create mount point {}", path.display()),
                e,
            )
        })?;
    Ok(true)
}
