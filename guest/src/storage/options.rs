//! Mount option translation.
//!
//! Splits symbolic mount options into kernel mount flags and the residual,
//! filesystem-specific option string passed as mount data.

use nix::mount::MsFlags;

const MOUNT_FLAGS: &[(&str, MsFlags)] = &[
    ("acl", MsFlags::MS_POSIXACL),
    ("bind", MsFlags::MS_BIND),
    ("dirsync", MsFlags::MS_DIRSYNC),
    ("iversion", MsFlags::MS_I_VERSION),
    ("mand", MsFlags::MS_MANDLOCK),
    ("noatime", MsFlags::MS_NOATIME),
    ("nodev", MsFlags::MS_NODEV),
    ("nodiratime", MsFlags::MS_NODIRATIME),
    ("noexec", MsFlags::MS_NOEXEC),
    ("nosuid", MsFlags::MS_NOSUID),
    ("private", MsFlags::MS_PRIVATE),
    ("rbind", MsFlags::MS_BIND.union(MsFlags::MS_REC)),
    ("relatime", MsFlags::MS_RELATIME),
    ("remount", MsFlags::MS_REMOUNT),
    ("ro", MsFlags::MS_RDONLY),
    ("rprivate", MsFlags::MS_PRIVATE.union(MsFlags::MS_REC)),
    ("rshared", MsFlags::MS_SHARED.union(MsFlags::MS_REC)),
    ("rslave", MsFlags::MS_SLAVE.union(MsFlags::MS_REC)),
    ("runbindable", MsFlags::MS_UNBINDABLE.union(MsFlags::MS_REC)),
    ("shared", MsFlags::MS_SHARED),
    ("silent", MsFlags::MS_SILENT),
    ("slave", MsFlags::MS_SLAVE),
    ("strictatime", MsFlags::MS_STRICTATIME),
    ("sync", MsFlags::MS_SYNCHRONOUS),
    ("unbindable", MsFlags::MS_UNBINDABLE),
];

/// Keyword to mount-flag table.
///
/// Every entry carries a non-empty flag set.
#[derive(Clone, Copy, Debug)]
pub struct FlagTable(&'static [(&'static str, MsFlags)]);

impl Default for FlagTable {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FlagTable {
    pub const DEFAULT: FlagTable = FlagTable(MOUNT_FLAGS);

    #[allow(dead_code)] // API completeness
    pub const fn new(entries: &'static [(&'static str, MsFlags)]) -> Self {
        Self(entries)
    }

    pub fn lookup(&self, keyword: &str) -> Option<MsFlags> {
        self.0
            .iter()
            .find(|(name, _)| *name == keyword)
            .map(|(_, flags)| *flags)
    }

    pub fn entries(&self) -> &'static [(&'static str, MsFlags)] {
        self.0
    }

    /// Translate option tokens into mount flags plus the comma-joined
    /// residual options.
    ///
    /// Recognized keywords are OR-ed into the flags and removed; every other
    /// token is kept in its original order.
    pub fn translate<S: AsRef<str>>(&self, options: &[S]) -> (MsFlags, String) {
        let mut flags = MsFlags::empty();
        let mut data = String::new();

        for opt in options {
            let opt = opt.as_ref();
            match self.lookup(opt) {
                Some(bits) => flags |= bits,
                None => {
                    if !data.is_empty() {
                        data.push(',');
                    }
                    data.push_str(opt);
                }
            }
        }

        tracing::debug!(
            "Translated {} mount options: flags={:?}, data={:?}",
            options.len(),
            flags,
            data
        );
        (flags, data)
    }
}

/// Translate options with the default flag table.
#[allow(dead_code)] // API completeness
pub fn parse_mount_flags_and_options<S: AsRef<str>>(options: &[S]) -> (MsFlags, String) {
    FlagTable::DEFAULT.translate(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_plain_options_keep_order() {
        let cases: &[(&[&str], &str)] = &[
            (&[], ""),
            (&["moo"], "moo"),
            (&["moo", "foo"], "moo,foo"),
            (&["foo", "moo"], "foo,moo"),
        ];
        for (options, expected) in cases {
            let (flags, data) = parse_mount_flags_and_options(options);
            assert_eq!(flags, MsFlags::empty(), "options {:?}", options);
            assert_eq!(data, *expected, "options {:?}", options);
        }
    }

    #[test]
    fn test_every_keyword_is_extracted() {
        for (name, bits) in FlagTable::DEFAULT.entries() {
            let (flags, data) = parse_mount_flags_and_options(&["foo", name, "bar"]);
            assert_eq!(flags, *bits, "keyword {}", name);
            assert_eq!(data, "foo,bar", "keyword {}", name);
        }
    }

    #[test]
    fn test_table_entries_are_unique_and_non_empty() {
        let entries = FlagTable::DEFAULT.entries();
        for (i, (name, bits)) in entries.iter().enumerate() {
            assert!(!bits.is_empty(), "{} has no flags", name);
            assert!(
                entries[i + 1..].iter().all(|(other, _)| other != name),
                "{} listed twice",
                name
            );
        }
    }

    #[test]
    fn test_mixed_options() {
        let (flags, data) =
            parse_mount_flags_and_options(&["ro", "trans=virtio", "nosuid", "version=9p2000.L"]);
        assert_eq!(flags, MsFlags::MS_RDONLY | MsFlags::MS_NOSUID);
        assert_eq!(data, "trans=virtio,version=9p2000.L");
    }

    #[test]
    fn test_custom_table() {
        const ONLY_RO: &[(&str, MsFlags)] = &[("ro", MsFlags::MS_RDONLY)];
        let table = FlagTable::new(ONLY_RO);
        let (flags, data) = table.translate(&["ro", "nosuid"]);
        assert_eq!(flags, MsFlags::MS_RDONLY);
        assert_eq!(data, "nosuid");
    }

    fn option_token() -> impl Strategy<Value = String> {
        let keywords: Vec<String> = FlagTable::DEFAULT
            .entries()
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        prop_oneof![
            proptest::sample::select(keywords),
            "[a-z]{1,8}(=[a-z0-9]{1,4})?",
        ]
    }

    proptest! {
        #[test]
        fn prop_translation_is_reversible(tokens in proptest::collection::vec(option_token(), 0..12)) {
            let table = FlagTable::DEFAULT;
            let (flags, data) = table.translate(&tokens);

            let expected_flags = tokens
                .iter()
                .filter_map(|t| table.lookup(t))
                .fold(MsFlags::empty(), |acc, bits| acc | bits);
            prop_assert_eq!(flags, expected_flags);

            let residual: Vec<&str> = tokens
                .iter()
                .map(String::as_str)
                .filter(|t| table.lookup(t).is_none())
                .collect();
            prop_assert_eq!(&data, &residual.join(","));

            // Keywords recovered from the flags plus the residual rebuild the
            // original token set.
            let input: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
            let mut rebuilt: BTreeSet<&str> = table
                .entries()
                .iter()
                .filter(|(_, bits)| flags.contains(*bits))
                .map(|(name, _)| *name)
                .filter(|name| input.contains(name))
                .collect();
            let recovered = rebuilt
                .iter()
                .filter_map(|name| table.lookup(name))
                .fold(MsFlags::empty(), |acc, bits| acc | bits);
            prop_assert_eq!(recovered, flags);
            if !data.is_empty() {
                rebuilt.extend(data.split(','));
            }
            prop_assert_eq!(rebuilt, input);
        }
    }
}
