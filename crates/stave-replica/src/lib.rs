//! Mutation broadcasting for the Stave document engine.
//!
//! The [`ReplicationHub`] fans each committed batch of [`Mutation`]s out to
//! bounded per-subscriber queues. A new subscriber first receives a
//! bootstrap (the current tree as `ObjectAdded` events), then every later
//! commit in order. A [`Replica`] turns that stream back into a read-only
//! [`Pool`].
//!
//! [`Mutation`]: stave_pool::Mutation
//! [`Pool`]: stave_pool::Pool

pub mod error;
pub mod hub;
pub mod replica;

pub use error::{ReplicaError, ReplicaResult};
pub use hub::{EventBatch, EventFilter, HubStats, ReplicationHub, Subscription};
pub use replica::Replica;
