//! Typed object pool for the Stave document engine.
//!
//! A [`Pool`] owns every node of one open document as a single tree under a
//! designated root. Nodes are instances of a closed set of [`NodeClass`]es,
//! each described by a static [`ClassSchema`] of typed, named fields.
//!
//! # Change events
//!
//! Every state change is expressed as a [`Mutation`]. Pool operations build
//! the events describing their effect, apply them, and append them to the
//! journal. Once a command commits, its batch is handed to each
//! [`PoolObserver`] through [`Pool::publish`]. Because each event has
//! an exact inverse, the journal is enough to roll back a failed command,
//! undo a committed one, or bring a replica up to date.
//!
//! # Design Rules
//!
//! 1. A node has at most one owner; the child's [`ParentLink`] is derived
//!    from the owner's field and never followed for ownership.
//! 2. Nodes created or detached inside a command float until attached.
//! 3. Weak references are looked up by id; a reference to a removed node is
//!    reported as dangling, never silently cleared.
//! 4. Snapshots are pre-order and byte-stable for a given tree.

mod apply;
pub mod class;
mod edit;
pub mod error;
pub mod field;
mod ids;
mod integrity;
pub mod mutation;
pub mod node;
pub mod observer;
pub mod pool;
pub mod schema;
pub mod snapshot;

pub use class::{NodeClass, TimeSignature};
pub use error::{PoolError, PoolResult};
pub use field::{Element, FieldSet, FieldValue, NodeArgs};
pub use mutation::{Mutation, MutationKind};
pub use node::{NodeRecord, ObjectNode, ParentLink};
pub use observer::PoolObserver;
pub use pool::{DanglingRef, JournalMark, Pool};
pub use schema::{ClassSchema, FieldKind, FieldSpec};
pub use snapshot::{same_structure, ClonedSubtree, ExternalRef, Snapshot, SNAPSHOT_FORMAT};
