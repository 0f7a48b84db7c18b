//! Foundation types for the Stave document engine.
//!
//! This crate provides the identity, value, and error-classification types
//! shared by every other Stave crate.
//!
//! # Key Types
//!
//! - [`NodeId`] - Random 64-bit identity of one node in a document tree
//! - [`DocumentId`] - UUID v7 identity of a whole document on disk
//! - [`Value`] / [`ScalarType`] - Scalar property values and their type tags
//! - [`Wrapped`] - Opaque value-type payload with typed encode/decode
//! - [`ErrorKind`] - Error taxonomy every crate maps its errors onto

pub mod document;
pub mod error;
pub mod id;
pub mod kind;
pub mod value;

pub use document::DocumentId;
pub use error::TypeError;
pub use id::NodeId;
pub use kind::ErrorKind;
pub use value::{ScalarType, Value, Wrapped, WrappedType};
