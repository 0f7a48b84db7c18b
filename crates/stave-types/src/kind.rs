use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification every Stave error maps onto.
///
/// Callers use the kind to decide whether to retry a request, abort an
/// enclosing batch, or alert a user, without matching on crate-specific
/// error enums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A node id did not resolve.
    UnknownId,
    /// A field was missing, unknown, or had the wrong type.
    SchemaViolation,
    /// A weak reference points at a node that no longer exists.
    DanglingReference,
    /// A node would end up with two owners, or was detached the wrong way.
    OwnershipViolation,
    /// A command's precondition was not met. Nothing was mutated.
    CommandValidationFailed,
    /// A command failed while running. Its mutations were rolled back.
    CommandRuntimeFailed,
    /// A checkpoint or log failed to parse or replay.
    CorruptedDocument,
    /// Another process holds the document lock.
    LockContention,
    /// The document was opened read-only.
    ReadOnly,
    /// Underlying I/O failure.
    Io,
    /// Invariant broken inside the engine itself.
    Internal,
}

impl ErrorKind {
    /// Returns `true` when resubmitting a corrected request can succeed
    /// without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnknownId
                | Self::SchemaViolation
                | Self::DanglingReference
                | Self::OwnershipViolation
                | Self::CommandValidationFailed
                | Self::CommandRuntimeFailed
                | Self::LockContention
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownId => "UnknownId",
            Self::SchemaViolation => "SchemaViolation",
            Self::DanglingReference => "DanglingReference",
            Self::OwnershipViolation => "OwnershipViolation",
            Self::CommandValidationFailed => "CommandValidationFailed",
            Self::CommandRuntimeFailed => "CommandRuntimeFailed",
            Self::CorruptedDocument => "CorruptedDocument",
            Self::LockContention => "LockContention",
            Self::ReadOnly => "ReadOnly",
            Self::Io => "Io",
            Self::Internal => "Internal",
        };
        write!(f, "{s}")
    }
}
