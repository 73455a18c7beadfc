//! Sandbox-wide shared state.
//!
//! One mutex guards both the device-address table (filled by the hotplug
//! listener) and the reference-counted table of mounted storages. Access goes
//! through [`Sandbox::with_tables`], so the lock is released on every exit
//! path and is never held across a mount syscall.
//!
//! A mount point being attached or unmounted is reserved in the tables for
//! the duration of the syscall. Anyone else claiming or releasing it waits
//! until the reservation is settled, so a mount point never carries more than
//! one physical mount.

use std::collections::{HashMap, HashSet};

use parking_lot::{Condvar, Mutex};

use crate::storage::{StorageKind, StorageResult};

/// Bookkeeping for one mounted storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageRef {
    /// Number of consumers sharing the mount. Always at least 1.
    pub ref_count: u32,
    /// Handler that produced the mount; decides how it is torn down.
    pub kind: StorageKind,
}

/// Outcome of dropping one reference to a storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// Other consumers remain.
    Shared(u32),
    /// Last reference dropped; the entry has been removed.
    Last(StorageKind),
}

#[derive(Debug, Default)]
pub struct SandboxTables {
    /// Fully-qualified PCI path -> guest device node.
    device_addresses: HashMap<String, String>,
    /// Mount point -> reference.
    mounted_storages: HashMap<String, StorageRef>,
    /// Mount points with an attach or unmount in flight.
    pending: HashSet<String>,
}

impl SandboxTables {
    pub fn device_path(&self, pci_path: &str) -> Option<&str> {
        self.device_addresses.get(pci_path).map(String::as_str)
    }

    pub fn storage(&self, mount_point: &str) -> Option<&StorageRef> {
        self.mounted_storages.get(mount_point)
    }

    /// Take another reference on an already mounted storage.
    ///
    /// Returns the new count, or `None` if the mount point is unknown.
    pub fn share_storage(&mut self, mount_point: &str) -> Option<u32> {
        let entry = self.mounted_storages.get_mut(mount_point)?;
        entry.ref_count += 1;
        Some(entry.ref_count)
    }

    /// Record a successful mount, or take another reference if the mount
    /// point is already known. Returns the new count.
    pub fn add_storage(&mut self, mount_point: &str, kind: StorageKind) -> u32 {
        if let Some(count) = self.share_storage(mount_point) {
            return count;
        }
        self.mounted_storages
            .insert(mount_point.to_string(), StorageRef { ref_count: 1, kind });
        1
    }

    /// Drop one reference. `None` if the mount point is unknown.
    pub fn release_storage(&mut self, mount_point: &str) -> Option<Release> {
        let entry = self.mounted_storages.get_mut(mount_point)?;
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return Some(Release::Shared(entry.ref_count));
        }
        let kind = entry.kind;
        self.mounted_storages.remove(mount_point);
        Some(Release::Last(kind))
    }

    #[allow(dead_code)] // API completeness
    pub fn mounted_count(&self) -> usize {
        self.mounted_storages.len()
    }

    fn is_pending(&self, mount_point: &str) -> bool {
        self.pending.contains(mount_point)
    }
}

/// Result of [`Sandbox::claim_storage`].
#[derive(Debug)]
pub enum Claim<'a> {
    /// Already mounted; one more reference was taken.
    Shared(u32),
    /// Not mounted; the caller now owns the mount point until the
    /// reservation is committed or dropped.
    Reserved(Reservation<'a>),
}

/// Exclusive right to mount a storage at one mount point.
///
/// Dropping it without [`commit`](Reservation::commit) records nothing and
/// lets waiters proceed.
#[derive(Debug)]
pub struct Reservation<'a> {
    sandbox: &'a Sandbox,
    mount_point: String,
    settled: bool,
}

impl Reservation<'_> {
    /// Record the mount the handler produced and lift the reservation.
    ///
    /// Returns the reference count of `mount_point`.
    pub fn commit(mut self, mount_point: &str, kind: StorageKind) -> u32 {
        self.settled = true;
        self.sandbox
            .settle(&self.mount_point, |t| t.add_storage(mount_point, kind))
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.sandbox.settle(&self.mount_point, |_| ());
        }
    }
}

/// Result of [`Sandbox::detach_storage`].
#[derive(Debug)]
pub enum Detach<'a> {
    /// Other consumers remain.
    Shared(u32),
    /// Last reference of a storage that is not a kernel mount; forgotten.
    Forgotten(StorageKind),
    /// Last reference of a kernel mount; the caller must unmount it.
    Teardown(Teardown<'a>),
}

/// Pending unmount of a storage whose last reference was dropped.
///
/// The entry is gone from the table while the teardown is held. Unless the
/// unmount succeeds it is put back with a single reference.
#[derive(Debug)]
pub struct Teardown<'a> {
    sandbox: &'a Sandbox,
    mount_point: String,
    kind: StorageKind,
    unmounted: bool,
}

impl Teardown<'_> {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Run `unmount` on the mount point and settle the table accordingly.
    pub fn run(mut self, unmount: impl FnOnce(&str) -> StorageResult<()>) -> StorageResult<()> {
        let result = unmount(&self.mount_point);
        self.unmounted = result.is_ok();
        result
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        let (unmounted, kind) = (self.unmounted, self.kind);
        self.sandbox.settle(&self.mount_point, |t| {
            if !unmounted {
                tracing::warn!("Storage {} is still mounted, keeping it", self.mount_point);
                t.add_storage(&self.mount_point, kind);
            }
        });
    }
}

/// Process-wide sandbox state, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct Sandbox {
    tables: Mutex<SandboxTables>,
    /// Signalled whenever a reservation is settled.
    idle: Condvar,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the tables.
    pub fn with_tables<R>(&self, f: impl FnOnce(&mut SandboxTables) -> R) -> R {
        let mut tables = self.tables.lock();
        f(&mut tables)
    }

    /// Record a hotplugged device. Called by the hotplug listener only.
    pub fn record_device(&self, pci_path: impl Into<String>, dev_path: impl Into<String>) {
        let (pci_path, dev_path) = (pci_path.into(), dev_path.into());
        tracing::debug!("Recording device {} at {}", pci_path, dev_path);
        self.with_tables(|t| t.device_addresses.insert(pci_path, dev_path));
    }

    pub fn device_path(&self, pci_path: &str) -> Option<String> {
        self.with_tables(|t| t.device_path(pci_path).map(str::to_string))
    }

    #[allow(dead_code)] // API completeness
    pub fn storage_ref(&self, mount_point: &str) -> Option<StorageRef> {
        self.with_tables(|t| t.storage(mount_point).copied())
    }

    /// Share the storage at `mount_point`, or reserve it for mounting.
    ///
    /// Blocks while another attach or unmount of the same mount point is in
    /// flight.
    pub fn claim_storage(&self, mount_point: &str) -> Claim<'_> {
        let mut tables = self.tables.lock();
        while tables.is_pending(mount_point) {
            self.idle.wait(&mut tables);
        }
        if let Some(count) = tables.share_storage(mount_point) {
            return Claim::Shared(count);
        }
        tables.pending.insert(mount_point.to_string());
        Claim::Reserved(Reservation {
            sandbox: self,
            mount_point: mount_point.to_string(),
            settled: false,
        })
    }

    /// Drop one reference to `mount_point`. `None` if it is not attached.
    ///
    /// Blocks while another attach or unmount of the same mount point is in
    /// flight.
    pub fn detach_storage(&self, mount_point: &str) -> Option<Detach<'_>> {
        let mut tables = self.tables.lock();
        while tables.is_pending(mount_point) {
            self.idle.wait(&mut tables);
        }
        let detach = match tables.release_storage(mount_point)? {
            Release::Shared(count) => Detach::Shared(count),
            Release::Last(kind) if !kind.is_kernel_mount() => Detach::Forgotten(kind),
            Release::Last(kind) => {
                tables.pending.insert(mount_point.to_string());
                Detach::Teardown(Teardown {
                    sandbox: self,
                    mount_point: mount_point.to_string(),
                    kind,
                    unmounted: false,
                })
            }
        };
        Some(detach)
    }

    /// Lift the reservation on `mount_point` after applying `f`, then wake
    /// waiters.
    fn settle<R>(&self, mount_point: &str, f: impl FnOnce(&mut SandboxTables) -> R) -> R {
        let result = {
            let mut tables = self.tables.lock();
            tables.pending.remove(mount_point);
            f(&mut tables)
        };
        self.idle.notify_all();
        result
    }
}
