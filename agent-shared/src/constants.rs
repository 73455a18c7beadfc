//! Shared constants between host and guest
//!
//! These constants must be identical on both sides of the host-guest boundary.

/// Storage driver tags carried in [`crate::StorageDescriptor::driver`].
pub mod drivers {
    /// In-memory filesystem created inside the guest.
    pub const EPHEMERAL: &str = "ephemeral";

    /// Plain guest directory, no kernel mount.
    pub const LOCAL: &str = "local";

    /// Share exported by the host over virtio 9p.
    pub const VIRTIO_9P: &str = "9p";

    /// Hotplugged virtio-blk disk addressed by its PCI bridge chain.
    pub const VIRTIO_BLK: &str = "blk";
}

/// Filesystem type names understood by the guest kernel.
pub mod fs_types {
    pub const TMPFS: &str = "tmpfs";
    pub const NINE_P: &str = "9p";
    pub const VIRTIOFS: &str = "virtiofs";
    pub const PROC: &str = "proc";
    pub const SYSFS: &str = "sysfs";
    pub const DEVTMPFS: &str = "devtmpfs";

    /// Filesystems whose mount source is a tag or keyword rather than a path.
    pub const PSEUDO: &[&str] = &[TMPFS, NINE_P, VIRTIOFS, PROC, SYSFS, DEVTMPFS];
}

/// Guest PCI topology as exposed by sysfs.
pub mod pci {
    /// Default sysfs mount point in the guest.
    pub const SYSFS_ROOT: &str = "/sys";

    /// PCI domain and bus of the root complex.
    pub const ROOT_BUS: &str = "0000:00";

    /// Directory of the root complex, relative to the sysfs root.
    pub const ROOT_BUS_DIR: &str = "devices/pci0000:00";

    /// Subdirectory of a bridge device listing its secondary bus.
    pub const BRIDGE_BUS_DIR: &str = "pci_bus";
}

/// Permission defaults for directories the guest creates.
pub mod modes {
    /// Mount-point directories created before a kernel mount.
    pub const MOUNT_DIR: u32 = 0o755;

    /// Local storage directories without an explicit `mode=` option.
    pub const LOCAL_DIR: u32 = 0o777;
}
