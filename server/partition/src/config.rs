//! Partition configuration, as read from a `partition.toml` style file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::prelude::*;

fn default_sync_on_write() -> bool {
    true
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_TARGET
}

fn default_index_cache_size() -> usize {
    DEFAULT_INDEX_CACHE_SIZE
}

/// A user index on one attribute.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Any name or OID of the attribute type.
    pub attribute: String,
    /// Number of ids whose reverse values are cached.
    #[serde(default = "default_index_cache_size")]
    pub cache_size: usize,
}

impl IndexConfig {
    pub fn new(attribute: &str) -> Self {
        IndexConfig {
            attribute: attribute.to_string(),
            cache_size: DEFAULT_INDEX_CACHE_SIZE,
        }
    }
}

/// The configuration of one partition.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// File path of the database. Empty keeps everything in memory.
    #[serde(default)]
    pub path: String,
    /// The DN of the partition context entry, eg `dc=example,dc=com`.
    pub suffix: String,
    /// Commit after every mutation. When false, the caller is expected to
    /// call `Store::sync` periodically.
    #[serde(default = "default_sync_on_write")]
    pub sync_on_write: bool,
    /// Number of entries held in the entry cache.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Attributes to maintain user indices on.
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

impl StoreConfig {
    /// An in memory partition with no user indices.
    pub fn new_test(suffix: &str) -> Self {
        StoreConfig {
            path: String::new(),
            suffix: suffix.to_string(),
            sync_on_write: true,
            cache_size: DEFAULT_CACHE_TARGET,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, attribute: &str) -> Self {
        self.indexes.push(IndexConfig::new(attribute));
        self
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, OperationError> {
        toml::from_str(contents).map_err(|e| {
            admin_error!(?e, "unable to parse partition config");
            OperationError::InvalidState
        })
    }

    pub fn from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, OperationError> {
        let mut f = File::open(config_path.as_ref()).map_err(|e| {
            admin_error!(?e, path = ?config_path.as_ref(), "Unable to open config file");
            OperationError::FsError
        })?;

        let mut contents = String::new();
        f.read_to_string(&mut contents).map_err(|e| {
            admin_error!(?e, "unable to read contents");
            OperationError::FsError
        })?;

        Self::from_toml_str(contents.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let cfg = StoreConfig::from_toml_str(r#"suffix = "dc=example,dc=com""#).expect("parse");
        assert_eq!(cfg.suffix, "dc=example,dc=com");
        assert!(cfg.path.is_empty());
        assert!(cfg.sync_on_write);
        assert_eq!(cfg.cache_size, DEFAULT_CACHE_TARGET);
        assert!(cfg.indexes.is_empty());
    }

    #[test]
    fn test_config_full() {
        let cfg = StoreConfig::from_toml_str(
            r#"
            path = "/var/lib/xdbm/example.db"
            suffix = "dc=example,dc=com"
            sync_on_write = false
            cache_size = 4096

            [[indexes]]
            attribute = "cn"

            [[indexes]]
            attribute = "uid"
            cache_size = 500
            "#,
        )
        .expect("parse");
        assert!(!cfg.sync_on_write);
        assert_eq!(cfg.cache_size, 4096);
        assert_eq!(
            cfg.indexes,
            vec![
                IndexConfig::new("cn"),
                IndexConfig {
                    attribute: "uid".to_string(),
                    cache_size: 500
                }
            ]
        );
    }

    #[test]
    fn test_config_rejects_unknown_and_missing() {
        assert!(StoreConfig::from_toml_str("path = \"\"").is_err());
        assert!(StoreConfig::from_toml_str("suffix = \"dc=a\"\nbogus = 1").is_err());
    }

    #[test]
    fn test_config_from_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partition.toml");
        let mut f = File::create(&path).expect("create");
        writeln!(f, "suffix = \"o=test\"").expect("write");
        let cfg = StoreConfig::from_path(&path).expect("load");
        assert_eq!(cfg, StoreConfig::new_test("o=test"));
        assert_eq!(
            StoreConfig::from_path(dir.path().join("missing.toml")),
            Err(OperationError::FsError)
        );
    }
}
