//! Storage descriptor sent by the host.

use serde::{Deserialize, Serialize};

/// One storage attachment request.
///
/// The guest only reads descriptors; interpretation of `source` depends on
/// `driver` (a path, a 9p share, a PCI bridge chain such as `02/03`, or
/// nothing at all for ephemeral storage).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDescriptor {
    pub driver: String,
    #[serde(default)]
    pub source: String,
    pub mount_point: String,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl StorageDescriptor {
    /// Value of the first `key=value` option with the given key.
    pub fn option_value(&self, key: &str) -> Option<&str> {
        self.options.iter().find_map(|opt| {
            let (k, v) = opt.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{"driver": "ephemeral", "mountPoint": "/run/shm"}"#;
        let desc: StorageDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.driver, "ephemeral");
        assert_eq!(desc.mount_point, "/run/shm");
        assert!(desc.source.is_empty());
        assert!(desc.fs_type.is_empty());
        assert!(desc.options.is_empty());
    }

    #[test]
    fn test_deserialize_batch_with_absent_slots() {
        let json = r#"[
            null,
            {"driver": "blk", "source": "02/03", "mountPoint": "/data",
             "fsType": "ext4", "options": ["ro", "noatime"]}
        ]"#;
        let batch: Vec<Option<StorageDescriptor>> = serde_json::from_str(json).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_none());
        let blk = batch[1].as_ref().unwrap();
        assert_eq!(blk.source, "02/03");
        assert_eq!(blk.options, vec!["ro", "noatime"]);
    }

    #[test]
    fn test_option_value() {
        let desc = StorageDescriptor {
            options: vec!["size=64m".into(), "mode=0400".into(), "mode=0700".into()],
            ..Default::default()
        };
        assert_eq!(desc.option_value("mode"), Some("0400"));
        assert_eq!(desc.option_value("size"), Some("64m"));
        assert_eq!(desc.option_value("uid"), None);
    }
}
