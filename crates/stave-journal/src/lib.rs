//! Durability layer for the Stave document engine.
//!
//! A document lives in one directory holding numbered checkpoints (full
//! images of the document) and command log segments (every commit since
//! the matching checkpoint). `state.latest` names the checkpoint a reopen
//! starts from; `.lock` keeps a second writer out.
//!
//! # Recovery
//!
//! Opening reads checkpoint N, then every record of segment N and each
//! following contiguous segment. The caller replays those records on top of
//! the checkpoint image. Checkpoints rotate the log first and are written
//! afterwards, so a crash during a checkpoint write loses nothing: the older
//! checkpoint plus both segments still reproduce the document.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod layout;
pub mod lock;
pub mod pointer;
pub mod segment;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointHeader};
pub use config::{Retention, StoreConfig, SyncMode};
pub use error::{JournalError, JournalResult};
pub use pointer::LatestPointer;
pub use segment::{LogEntry, LogRecord};
pub use store::{
    inspect, read_log, CheckpointSummary, DocumentStore, PendingCheckpoint, Recovery,
    SegmentSummary, StoreSummary,
};
