use stave_command::CommandError;
use stave_journal::JournalError;
use stave_pool::PoolError;
use stave_types::ErrorKind;

/// Errors produced by the document facade and its service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A command was rejected or failed. Nothing was logged or published.
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A logged record did not replay on top of the checkpoint.
    #[error("document corrupted at commit {seq}: {reason}")]
    Corrupted { seq: u64, reason: String },

    /// The checkpoint payload could not be decoded.
    #[error("invalid document image: {0}")]
    Image(String),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    /// The document was opened from a checkpoint only.
    #[error("document is open read-only")]
    ReadOnly,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The document service thread has stopped.
    #[error("document service is closed")]
    ServiceClosed,
}

impl EngineError {
    /// Map onto the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Command(e) => e.kind(),
            Self::Journal(e) => e.kind(),
            Self::Pool(e) => e.kind(),
            Self::Corrupted { .. } | Self::Image(_) => ErrorKind::CorruptedDocument,
            Self::NothingToUndo | Self::NothingToRedo => ErrorKind::CommandValidationFailed,
            Self::ReadOnly => ErrorKind::ReadOnly,
            Self::Io(_) => ErrorKind::Io,
            Self::Config(_) | Self::ServiceClosed => ErrorKind::Internal,
        }
    }

    pub(crate) fn corrupted(seq: u64, reason: impl ToString) -> Self {
        Self::Corrupted {
            seq,
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used throughout the engine crate.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn kinds_pass_through() {
        let locked = EngineError::from(JournalError::LockContention(PathBuf::from("/tmp/doc")));
        assert_eq!(locked.kind(), ErrorKind::LockContention);
        assert_eq!(
            EngineError::corrupted(4, "bad").kind(),
            ErrorKind::CorruptedDocument
        );
        assert_eq!(
            EngineError::from(CommandError::rejected("Rename", "blank")).kind(),
            ErrorKind::CommandValidationFailed
        );
        assert_eq!(EngineError::ReadOnly.kind(), ErrorKind::ReadOnly);
    }
}
