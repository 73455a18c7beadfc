//! Storage agent configuration.
//!
//! Every field has a default so an empty JSON object is a valid config.
//! Permission modes may be written either as numbers or as octal strings
//! (`"0755"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_shared::constants::{modes, pci};
use agent_shared::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};

use crate::storage::FlagTable;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Prefix under which the guest PCI topology is read.
    pub sysfs_root: PathBuf,

    /// Mode for mount-point directories created before mounting.
    #[serde(with = "octal_mode")]
    pub mount_dir_mode: u32,

    /// Mode for local storage directories without a `mode=` option.
    #[serde(with = "octal_mode")]
    pub local_dir_mode: u32,

    /// Caller-side retry for devices the hotplug listener has not reported yet.
    pub retry: RetryPolicy,

    #[serde(skip)]
    pub flags: FlagTable,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(pci::SYSFS_ROOT),
            mount_dir_mode: modes::MOUNT_DIR,
            local_dir_mode: modes::LOCAL_DIR,
            retry: RetryPolicy::default(),
            flags: FlagTable::DEFAULT,
        }
    }
}

impl StorageConfig {
    /// Load a JSON config file.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| AgentError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

mod octal_mode {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mode {
        Number(u32),
        Octal(String),
    }

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Mode::deserialize(deserializer)? {
            Mode::Number(n) if n <= 0o7777 => Ok(n),
            Mode::Number(n) => Err(de::Error::custom(format!("mode {:o} out of range", n))),
            Mode::Octal(s) => crate::storage::mount::parse_mode(&s).map_err(de::Error::custom),
        }
    }
}
