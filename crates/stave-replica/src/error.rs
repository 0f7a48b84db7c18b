use stave_pool::PoolError;
use stave_types::ErrorKind;

/// Errors produced while following a replication stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicaError {
    /// A bootstrap stream or live event did not apply to the mirror.
    #[error("replica diverged: {0}")]
    Pool(#[from] PoolError),

    /// A commit batch arrived out of order.
    #[error("replication gap: expected commit {expected}, received {received}")]
    Gap { expected: u64, received: u64 },

    /// The hub dropped this subscriber; it must subscribe again.
    #[error("replication stream closed by the publisher")]
    Disconnected,

    /// A filtered subscription cannot feed a full mirror.
    #[error("replica needs an unfiltered subscription")]
    PartialStream,
}

impl ReplicaError {
    /// Map onto the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Pool(e) => e.kind(),
            Self::Gap { .. } | Self::Disconnected => ErrorKind::Io,
            Self::PartialStream => ErrorKind::Internal,
        }
    }
}

/// Convenience alias used throughout the replica crate.
pub type ReplicaResult<T> = Result<T, ReplicaError>;
