//! Command engine for the Stave document engine.
//!
//! Every edit of a document goes through a [`Command`]: a named, typed
//! argument record with a read-only `validate` step and a `run` step built
//! from pool primitives.
//!
//! # Execution
//!
//! ```text
//! Created --validate--> Validated --apply--> Applied
//!    |                      |
//!    +--> Rejected          +--> Failed (every mutation rolled back)
//! ```
//!
//! A command either commits all of its mutations or none. After `run`
//! returns, no node may be left floating and no weak reference may dangle;
//! otherwise the command fails and is rolled back.
//!
//! # Logging and replay
//!
//! Commands are persisted as a [`CommandRequest`] (name plus bincode-encoded
//! arguments) together with the ids they minted. The [`CommandRegistry`]
//! decodes requests again and [`replay`] re-runs them against the same ids,
//! reproducing the original events exactly.

pub mod builtin;
pub mod command;
pub mod error;
pub mod executor;
pub mod registry;

pub use command::{Command, CommandRequest, DynCommand};
pub use error::{CommandError, CommandResult};
pub use executor::{execute, replay, CommandState, Executed, Execution};
pub use registry::CommandRegistry;
