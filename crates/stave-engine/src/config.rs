use std::path::Path;

use serde::{Deserialize, Serialize};
use stave_journal::StoreConfig;

use crate::error::{EngineError, EngineResult};

/// Configuration of an open document.
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes:
///
/// ```toml
/// undo_depth = 50
/// auto_checkpoint_every = 1000
///
/// [store]
/// sync_mode = "every_write"
/// retention = "keep_all"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Durability settings of the document directory.
    pub store: StoreConfig,
    /// Committed commands kept for undo. Zero disables undo.
    pub undo_depth: usize,
    /// Commit batches queued per replication subscriber.
    pub subscriber_capacity: usize,
    /// Write a checkpoint after this many log records.
    pub auto_checkpoint_every: Option<u64>,
    /// Check pool integrity after recovery.
    pub verify_on_open: bool,
    /// Requests queued in front of the document service.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            undo_depth: 100,
            subscriber_capacity: 1024,
            auto_checkpoint_every: None,
            verify_on_open: true,
            queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Synced appends and kept files, for tests that inspect the directory.
    pub fn for_testing() -> Self {
        Self {
            store: StoreConfig::for_testing(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read a TOML configuration file.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use stave_journal::{Retention, SyncMode};

    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_file_overrides_named_keys() {
        let config = EngineConfig::from_toml_str(
            r#"
            undo_depth = 5
            auto_checkpoint_every = 100

            [store]
            sync_mode = { periodic = { interval_ms = 250 } }
            retention = "keep_all"
            "#,
        )
        .unwrap();
        assert_eq!(config.undo_depth, 5);
        assert_eq!(config.auto_checkpoint_every, Some(100));
        assert_eq!(config.store.sync_mode, SyncMode::Periodic { interval_ms: 250 });
        assert_eq!(config.store.retention, Retention::KeepAll);
        assert!(config.verify_on_open);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("undo_depth = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stave.toml");
        std::fs::write(&path, "verify_on_open = false\n").unwrap();
        assert!(!EngineConfig::load(&path).unwrap().verify_on_open);
    }
}
