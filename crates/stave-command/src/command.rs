use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stave_pool::Pool;
use stave_types::NodeId;

use crate::error::{CommandError, CommandResult};

// ---------------------------------------------------------------------------
// Command trait
// ---------------------------------------------------------------------------

/// A named, typed edit against a target node.
///
/// The implementing type is the command's argument record. It is encoded
/// with bincode for the command log and decoded again by the
/// [`CommandRegistry`](crate::CommandRegistry) on replay.
pub trait Command: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Stable name written to the log.
    const NAME: &'static str;

    /// Read-only precondition check. Must not depend on anything but the pool.
    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()>;

    /// Perform the edit through pool primitives.
    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()>;
}

// ---------------------------------------------------------------------------
// DynCommand
// ---------------------------------------------------------------------------

/// Object-safe view of a [`Command`], used by the executor and the registry.
pub trait DynCommand: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()>;
    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()>;
    fn encode_args(&self) -> CommandResult<Vec<u8>>;
}

impl<C: Command> DynCommand for C {
    fn name(&self) -> &'static str {
        C::NAME
    }

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        Command::validate(self, target, pool)
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        Command::run(self, target, pool)
    }

    fn encode_args(&self) -> CommandResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CommandError::Decode {
            command: C::NAME.to_string(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// CommandRequest
// ---------------------------------------------------------------------------

/// Inbound transport record: target, command name, and encoded arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub target: NodeId,
    pub command: String,
    pub args: Vec<u8>,
}

impl CommandRequest {
    /// Encode a typed command into a request.
    pub fn new<C: Command>(target: NodeId, command: &C) -> CommandResult<Self> {
        Ok(Self {
            target,
            command: C::NAME.to_string(),
            args: DynCommand::encode_args(command)?,
        })
    }

    /// Encode a boxed command into a request.
    pub fn from_dyn(target: NodeId, command: &dyn DynCommand) -> CommandResult<Self> {
        Ok(Self {
            target,
            command: command.name().to_string(),
            args: command.encode_args()?,
        })
    }
}
