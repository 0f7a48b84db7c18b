use serde::{Deserialize, Serialize};

/// Flush/sync strategy for command log appends.
///
/// Checkpoints and the latest pointer are always synced before they are
/// renamed into place, whatever the mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every append (safest, highest latency).
    EveryWrite,
    /// `fsync` when at least `interval_ms` passed since the last sync.
    Periodic { interval_ms: u64 },
    /// Flush to the OS and rely on its page cache.
    #[default]
    OsDefault,
}

/// What happens to older checkpoints and log segments once a newer
/// checkpoint is durable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Delete everything the new checkpoint supersedes.
    #[default]
    DeleteOnCheckpoint,
    /// Keep every checkpoint and segment (useful for auditing).
    KeepAll,
}

/// Configuration of a document store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub sync_mode: SyncMode,
    pub retention: Retention,
}

impl StoreConfig {
    /// Fully synced appends and no retention, for tests that inspect files.
    pub fn for_testing() -> Self {
        Self {
            sync_mode: SyncMode::EveryWrite,
            retention: Retention::KeepAll,
        }
    }
}
