use std::collections::HashMap;

use crate::builtin;
use crate::command::{Command, CommandRequest, DynCommand};
use crate::error::{CommandError, CommandResult};

type DecodeFn = fn(&[u8]) -> CommandResult<Box<dyn DynCommand>>;

fn decode_as<C: Command>(bytes: &[u8]) -> CommandResult<Box<dyn DynCommand>> {
    let command: C = bincode::deserialize(bytes).map_err(|e| CommandError::Decode {
        command: C::NAME.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Box::new(command))
}

/// Table from command name to argument decoder, built once at startup.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every builtin command.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register a command type under its [`Command::NAME`].
    pub fn register<C: Command>(&mut self) -> &mut Self {
        self.decoders.insert(C::NAME, decode_as::<C>);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.decoders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Decode the arguments of a named command.
    pub fn decode(&self, name: &str, args: &[u8]) -> CommandResult<Box<dyn DynCommand>> {
        let decode = self
            .decoders
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        decode(args)
    }

    pub fn decode_request(&self, request: &CommandRequest) -> CommandResult<Box<dyn DynCommand>> {
        self.decode(&request.command, &request.args)
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}
