//! Document facade for the Stave document engine.
//!
//! A [`Document`] ties the pieces together:
//!
//! ```text
//! dispatch(target, command)
//!   -> execute (validate, run, roll back on failure)     stave-command
//!   -> append LogEntry::Command to the active segment    stave-journal
//!   -> push the events onto the undo history
//!   -> publish the events to subscribers                 stave-replica
//! ```
//!
//! Opening a document loads the checkpoint named by `state.latest` and
//! replays every later log record. [`DocumentService`] runs a document on
//! its own thread behind an ordered queue and hands out cloneable
//! [`DocumentHandle`]s.

pub mod config;
pub mod document;
pub mod error;
pub mod history;
pub mod image;
pub mod service;

pub use config::EngineConfig;
pub use document::{CheckpointJob, Commit, Document};
pub use error::{EngineError, EngineResult};
pub use history::History;
pub use image::{DocumentImage, IMAGE_FORMAT};
pub use service::{DocumentHandle, DocumentService};
