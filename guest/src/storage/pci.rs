//! PCI device resolution.
//!
//! The host addresses a hotplugged disk by its slot chain through nested
//! bridges (`02/03`: slot 03 behind the bridge in slot 02 of the root bus).
//! Bus numbers behind bridges are assigned by the guest kernel, so they are
//! discovered from sysfs before the final address is looked up in the
//! sandbox device table.

use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;

use agent_shared::constants::pci;

use super::error::{StorageError, StorageResult};
use crate::sandbox::Sandbox;

/// Device slot on one bus, written as two hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PciSlot(u8);

impl FromStr for PciSlot {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::invalid(format!(
                "PCI slot {:?} is not two hex digits",
                s
            )));
        }
        u8::from_str_radix(s, 16)
            .map(PciSlot)
            .map_err(|e| StorageError::invalid(format!("PCI slot {:?}: {}", s, e)))
    }
}

impl fmt::Display for PciSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// Slot chain from the root bus down to the device, e.g. `02/03`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PciChain(Vec<PciSlot>);

impl FromStr for PciChain {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        let slots = s
            .split('/')
            .map(PciSlot::from_str)
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(PciChain(slots))
    }
}

/// A resolved device: its own address and the full bridge path to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PciPath {
    /// Final device address, e.g. `0000:01:03.0`.
    pub address: String,
    /// Addresses of every hop, e.g. `0000:00:02.0/0000:01:03.0`. This is the
    /// key of the sandbox device table.
    pub chain: String,
}

/// Source of bridge-to-bus information.
pub trait PciTopology {
    /// Secondary bus behind the bridge at `bridge_path` (a `/`-joined list of
    /// device addresses starting at the root bus).
    fn secondary_bus(&self, bridge_path: &str) -> StorageResult<String>;
}

/// [`PciTopology`] backed by the guest's sysfs.
#[derive(Clone, Debug)]
pub struct SysfsTopology {
    root_bus_dir: PathBuf,
}

impl SysfsTopology {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            root_bus_dir: sysfs_root.into().join(pci::ROOT_BUS_DIR),
        }
    }
}

impl PciTopology for SysfsTopology {
    fn secondary_bus(&self, bridge_path: &str) -> StorageResult<String> {
        let device_dir = self.root_bus_dir.join(bridge_path);
        if !device_dir.is_dir() {
            return Err(StorageError::not_found(format!(
                "PCI bridge {} not present in sysfs",
                device_dir.display()
            )));
        }

        let bus_dir = device_dir.join(pci::BRIDGE_BUS_DIR);
        let entries = match std::fs::read_dir(&bus_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::InvalidTopology(format!(
                    "{} exposes no bus (not a bridge?)",
                    device_dir.display()
                )))
            }
            Err(e) => {
                return Err(StorageError::handler(
                    format!("failed to list {}", bus_dir.display()),
                    e,
                ))
            }
        };

        let mut buses = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| is_bus_id(name));

        match (buses.next(), buses.next()) {
            (Some(bus), None) => Ok(bus),
            (None, _) => Err(StorageError::InvalidTopology(format!(
                "no PCI bus found in {}",
                bus_dir.display()
            ))),
            (Some(_), Some(_)) => Err(StorageError::InvalidTopology(format!(
                "more than one PCI bus found in {}",
                bus_dir.display()
            ))),
        }
    }
}

/// `dddd:bb` with hex digits.
fn is_bus_id(name: &str) -> bool {
    match name.split_once(':') {
        Some((domain, bus)) => {
            domain.len() == 4
                && bus.len() == 2
                && domain.bytes().chain(bus.bytes()).all(|b| b.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Walk the bridge chain in `source` down to its final device.
///
/// Touches no shared state.
pub fn resolve_pci_path(topology: &dyn PciTopology, source: &str) -> StorageResult<PciPath> {
    let chain: PciChain = source.parse()?;
    let Some((last, bridges)) = chain.0.split_last() else {
        return Err(StorageError::invalid("empty PCI slot chain"));
    };

    let mut bus = pci::ROOT_BUS.to_string();
    let mut path = String::new();

    for slot in bridges {
        push_hop(&mut path, &format!("{}:{}.0", bus, slot));
        bus = topology.secondary_bus(&path)?;
        tracing::debug!("PCI bridge {} leads to bus {}", path, bus);
    }

    let address = format!("{}:{}.0", bus, last);
    push_hop(&mut path, &address);

    Ok(PciPath {
        address,
        chain: path,
    })
}

fn push_hop(path: &mut String, address: &str) {
    if !path.is_empty() {
        path.push('/');
    }
    path.push_str(address);
}

/// Resolve `source` to the guest device node recorded by the hotplug listener.
///
/// A device the listener has not reported yet yields `NotFound`; retrying is
/// up to the caller.
pub fn resolve_device(
    topology: &dyn PciTopology,
    sandbox: &Sandbox,
    source: &str,
) -> StorageResult<String> {
    let pci_path = resolve_pci_path(topology, source)?;
    sandbox.device_path(&pci_path.chain).ok_or_else(|| {
        StorageError::not_found(format!(
            "no device node recorded for PCI device {} ({})",
            pci_path.address, pci_path.chain
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    /// Fake sysfs rooted in a temp directory.
    struct FakeSysfs {
        dir: TempDir,
    }

    impl FakeSysfs {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn add_bridge(&self, bridge_path: &str, bus: &str) {
            let bus_dir = self
                .dir
                .path()
                .join(pci::ROOT_BUS_DIR)
                .join(bridge_path)
                .join(pci::BRIDGE_BUS_DIR)
                .join(bus);
            fs::create_dir_all(bus_dir).unwrap();
        }

        fn topology(&self) -> SysfsTopology {
            SysfsTopology::new(self.dir.path())
        }
    }

    /// Records every bridge lookup.
    struct CountingTopology {
        buses: Vec<(&'static str, &'static str)>,
        calls: RefCell<Vec<String>>,
    }

    impl PciTopology for CountingTopology {
        fn secondary_bus(&self, bridge_path: &str) -> StorageResult<String> {
            self.calls.borrow_mut().push(bridge_path.to_string());
            self.buses
                .iter()
                .find(|(path, _)| *path == bridge_path)
                .map(|(_, bus)| bus.to_string())
                .ok_or_else(|| StorageError::not_found(bridge_path))
        }
    }

    #[test]
    fn test_parse_chain() {
        let chain: PciChain = "02/1f/0a".parse().unwrap();
        assert_eq!(chain.0.len(), 3);
        assert_eq!(chain.0[1].to_string(), "1f");

        for bad in ["", "2", "002", "0g", "02/", "/02", "02//03", "/dev/vda", "02:03"] {
            assert!(
                matches!(bad.parse::<PciChain>(), Err(StorageError::InvalidArgument(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_single_slot_skips_traversal() {
        let topology = CountingTopology {
            buses: vec![],
            calls: RefCell::new(vec![]),
        };
        let path = resolve_pci_path(&topology, "05").unwrap();
        assert_eq!(path.address, "0000:00:05.0");
        assert_eq!(path.chain, "0000:00:05.0");
        assert!(topology.calls.borrow().is_empty());
    }

    #[test]
    fn test_traversal_count() {
        let topology = CountingTopology {
            buses: vec![
                ("0000:00:02.0", "0000:01"),
                ("0000:00:02.0/0000:01:04.0", "0000:02"),
            ],
            calls: RefCell::new(vec![]),
        };
        let path = resolve_pci_path(&topology, "02/04/03").unwrap();
        assert_eq!(path.address, "0000:02:03.0");
        assert_eq!(path.chain, "0000:00:02.0/0000:01:04.0/0000:02:03.0");
        assert_eq!(
            *topology.calls.borrow(),
            vec!["0000:00:02.0", "0000:00:02.0/0000:01:04.0"]
        );
    }

    #[test]
    fn test_missing_bridge_stops_walk() {
        let topology = CountingTopology {
            buses: vec![("0000:00:02.0/0000:01:04.0", "0000:02")],
            calls: RefCell::new(vec![]),
        };
        let err = resolve_pci_path(&topology, "02/04/03").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(topology.calls.borrow().len(), 1);
    }

    #[test]
    fn test_malformed_source_touches_nothing() {
        let topology = CountingTopology {
            buses: vec![],
            calls: RefCell::new(vec![]),
        };
        let err = resolve_pci_path(&topology, "02/xyz").unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        assert!(topology.calls.borrow().is_empty());
    }

    #[test]
    fn test_sysfs_bridge_walk() {
        let sysfs = FakeSysfs::new();
        sysfs.add_bridge("0000:00:02.0", "0000:01");
        sysfs.add_bridge("0000:00:02.0/0000:01:05.0", "0000:02");

        let path = resolve_pci_path(&sysfs.topology(), "02/05/03").unwrap();
        assert_eq!(path.chain, "0000:00:02.0/0000:01:05.0/0000:02:03.0");
    }

    #[test]
    fn test_sysfs_missing_device_dir() {
        let sysfs = FakeSysfs::new();
        let err = sysfs.topology().secondary_bus("0000:00:02.0").unwrap_err();
        assert!(err.is_not_found(), "{:?}", err);
    }

    #[test]
    fn test_sysfs_device_is_not_a_bridge() {
        let sysfs = FakeSysfs::new();
        let device_dir = sysfs.dir.path().join(pci::ROOT_BUS_DIR).join("0000:00:02.0");
        fs::create_dir_all(&device_dir).unwrap();

        let err = sysfs.topology().secondary_bus("0000:00:02.0").unwrap_err();
        assert!(matches!(err, StorageError::InvalidTopology(_)), "{:?}", err);

        // pci_bus present but holding nothing that looks like a bus
        fs::create_dir_all(device_dir.join(pci::BRIDGE_BUS_DIR).join("power")).unwrap();
        let err = sysfs.topology().secondary_bus("0000:00:02.0").unwrap_err();
        assert!(matches!(err, StorageError::InvalidTopology(_)), "{:?}", err);
    }

    #[test]
    fn test_sysfs_ambiguous_bus() {
        let sysfs = FakeSysfs::new();
        sysfs.add_bridge("0000:00:02.0", "0000:01");
        sysfs.add_bridge("0000:00:02.0", "0000:07");
        let err = sysfs.topology().secondary_bus("0000:00:02.0").unwrap_err();
        assert!(matches!(err, StorageError::InvalidTopology(_)), "{:?}", err);
    }

    #[test]
    fn test_resolve_device_lookup() {
        let sysfs = FakeSysfs::new();
        sysfs.add_bridge("0000:00:02.0", "0000:01");
        let sandbox = Sandbox::new();

        let err = resolve_device(&sysfs.topology(), &sandbox, "02/03").unwrap_err();
        assert!(err.is_not_found());

        sandbox.record_device("0000:00:02.0/0000:01:03.0", "/dev/vdb");
        let dev = resolve_device(&sysfs.topology(), &sandbox, "02/03").unwrap();
        assert_eq!(dev, "/dev/vdb");
    }
}
