use std::io;
use std::path::PathBuf;

use stave_types::{DocumentId, ErrorKind};

/// Errors produced by the durability layer.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// I/O error during checkpoint, log, or pointer operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record or header could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A checkpoint, log segment, or pointer failed to parse or verify.
    #[error("corrupt {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A file belongs to a different document.
    #[error("{} belongs to document {found}, expected {expected}", path.display())]
    WrongDocument {
        path: PathBuf,
        expected: DocumentId,
        found: DocumentId,
    },

    /// Another process holds the document lock.
    #[error("document at {} is locked by another process", .0.display())]
    LockContention(PathBuf),

    /// No document exists at the path.
    #[error("no document at {}", .0.display())]
    NotFound(PathBuf),

    /// A document already exists at the path.
    #[error("a document already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    /// A second checkpoint was started before the first finished.
    #[error("checkpoint {0} is still being written")]
    CheckpointInProgress(u64),

    /// A failed append could not be undone on disk.
    #[error("log segment {} needs recovery before further appends", .0.display())]
    LogPoisoned(PathBuf),

    /// The store was opened without write access.
    #[error("document store is read-only")]
    ReadOnly,
}

impl JournalError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Map onto the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::NotFound(_) | Self::AlreadyExists(_) | Self::LogPoisoned(_) => {
                ErrorKind::Io
            }
            Self::Corrupt { .. } | Self::WrongDocument { .. } => ErrorKind::CorruptedDocument,
            Self::LockContention(_) => ErrorKind::LockContention,
            Self::ReadOnly => ErrorKind::ReadOnly,
            Self::Serialization(_) | Self::CheckpointInProgress(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience alias used throughout the journal crate.
pub type JournalResult<T> = Result<T, JournalError>;
