use stave_types::{ErrorKind, NodeId, TypeError};

use crate::class::NodeClass;

/// Errors produced by pool operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    /// The requested node is not in the pool.
    #[error("unknown node id: {0}")]
    UnknownId(NodeId),

    /// The class has no field with this name.
    #[error("class {class} has no field named {field:?}")]
    UnknownField { class: NodeClass, field: String },

    /// A field value does not match the schema.
    #[error("schema violation on {class}.{field}: {reason}")]
    SchemaViolation {
        class: NodeClass,
        field: String,
        reason: String,
    },

    /// A weak reference points at a node that is not in the pool.
    #[error("dangling reference {holder}.{field} -> {target}")]
    DanglingReference {
        holder: NodeId,
        field: String,
        target: NodeId,
    },

    /// An attach or detach would break the single-owner rule.
    #[error("ownership violation on {node}: {reason}")]
    OwnershipViolation { node: NodeId, reason: String },

    /// A list index is outside the list.
    #[error("index {index} out of bounds for {id}.{field} (len {len})")]
    IndexOutOfBounds {
        id: NodeId,
        field: String,
        index: usize,
        len: usize,
    },

    /// A node with this id already exists.
    #[error("duplicate node id: {0}")]
    DuplicateId(NodeId),

    /// An event's recorded old value does not match the pool.
    #[error("event does not apply to current state of {id}.{field}: {reason}")]
    StaleEvent {
        id: NodeId,
        field: String,
        reason: String,
    },

    /// A snapshot could not be decoded or is structurally invalid.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// An internal index disagrees with the node records.
    #[error("pool index inconsistent: {0}")]
    Inconsistent(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure from a foundation type (wrapped value decode, id parse).
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl PoolError {
    pub(crate) fn schema(class: NodeClass, field: &str, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            class,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn ownership(node: NodeId, reason: impl Into<String>) -> Self {
        Self::OwnershipViolation {
            node,
            reason: reason.into(),
        }
    }

    /// Map onto the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownId(_) => ErrorKind::UnknownId,
            Self::UnknownField { .. }
            | Self::SchemaViolation { .. }
            | Self::IndexOutOfBounds { .. }
            | Self::Type(_) => ErrorKind::SchemaViolation,
            Self::DanglingReference { .. } => ErrorKind::DanglingReference,
            Self::OwnershipViolation { .. } | Self::DuplicateId(_) => {
                ErrorKind::OwnershipViolation
            }
            Self::CorruptSnapshot(_) => ErrorKind::CorruptedDocument,
            Self::StaleEvent { .. } | Self::Inconsistent(_) | Self::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_errors_convert_and_clone() {
        let err: PoolError = TypeError::NullId.into();
        let copy = err.clone();
        assert_eq!(copy, err);
        assert_eq!(copy.kind(), ErrorKind::SchemaViolation);
        assert_eq!(copy.to_string(), "null node id is not a valid identity");
    }
}
