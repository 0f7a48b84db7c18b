use stave_pool::PoolError;
use stave_types::ErrorKind;

/// Errors produced while decoding, validating, running, or replaying a command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// A domain precondition was not met. Nothing was mutated.
    #[error("{command} rejected: {reason}")]
    ValidationFailed { command: String, reason: String },

    /// A pool lookup or schema check failed before anything was mutated.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// `run()` or the post-run checks failed; every mutation was undone.
    #[error("{command} failed and was rolled back: {source}")]
    RuntimeFailed {
        command: String,
        #[source]
        source: Box<CommandError>,
    },

    /// No command with this name is registered.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// Encoded arguments could not be decoded or encoded.
    #[error("cannot decode arguments of {command}: {reason}")]
    Decode { command: String, reason: String },

    /// Undoing a failed command failed too. The pool is no longer trusted.
    #[error("rollback of {command} failed: {source}")]
    RollbackFailed {
        command: String,
        #[source]
        source: PoolError,
    },

    /// A logged command did not reproduce its recorded effect.
    #[error("replay of {command} diverged: {reason}")]
    ReplayDiverged { command: String, reason: String },

    /// The executor was driven out of order.
    #[error("{command} cannot {action} in state {state}")]
    InvalidState {
        command: String,
        action: &'static str,
        state: String,
    },
}

impl CommandError {
    /// Shorthand for a validation failure.
    pub fn rejected(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Map onto the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed { .. } | Self::UnknownCommand(_) => {
                ErrorKind::CommandValidationFailed
            }
            Self::Pool(e) => e.kind(),
            Self::RuntimeFailed { .. } => ErrorKind::CommandRuntimeFailed,
            Self::Decode { .. } => ErrorKind::SchemaViolation,
            Self::ReplayDiverged { .. } => ErrorKind::CorruptedDocument,
            Self::RollbackFailed { .. } | Self::InvalidState { .. } => ErrorKind::Internal,
        }
    }
}

/// Result alias for command operations.
pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stave_types::NodeId;

    #[test]
    fn kinds() {
        assert_eq!(
            CommandError::rejected("Rename", "empty").kind(),
            ErrorKind::CommandValidationFailed
        );
        let id = NodeId::from_raw(3).unwrap();
        assert_eq!(
            CommandError::from(PoolError::UnknownId(id)).kind(),
            ErrorKind::UnknownId
        );
        let runtime = CommandError::RuntimeFailed {
            command: "Rename".into(),
            source: Box::new(CommandError::from(PoolError::UnknownId(id))),
        };
        assert_eq!(runtime.kind(), ErrorKind::CommandRuntimeFailed);
        assert!(runtime.to_string().contains("rolled back"));
    }
}
