//! The closed set of change events emitted by the pool.
//!
//! Every mutating pool operation is expressed as one or more [`Mutation`]s.
//! Each event carries enough state to be applied forward or inverted, which
//! is what rollback, undo, and replicas rely on.

use std::fmt;

use serde::{Deserialize, Serialize};
use stave_types::NodeId;

use crate::field::{Element, FieldValue};
use crate::node::NodeRecord;

/// One atomic state change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// A node entered the pool, floating until attached.
    ObjectAdded { node: NodeRecord },
    /// A floating, childless node left the pool.
    ObjectRemoved { node: NodeRecord },
    /// Whole-value replace of a scalar, wrapped, reference, or child field.
    PropertyValueChange {
        id: NodeId,
        field: String,
        old: FieldValue,
        new: FieldValue,
    },
    PropertyListInsert {
        id: NodeId,
        field: String,
        index: usize,
        value: Element,
    },
    PropertyListDelete {
        id: NodeId,
        field: String,
        index: usize,
        old: Element,
    },
    PropertyListReplace {
        id: NodeId,
        field: String,
        index: usize,
        old: Element,
        new: Element,
    },
}

/// Discriminant of a [`Mutation`], used for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    ObjectAdded,
    ObjectRemoved,
    PropertyValueChange,
    PropertyListInsert,
    PropertyListDelete,
    PropertyListReplace,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ObjectAdded => "ObjectAdded",
            Self::ObjectRemoved => "ObjectRemoved",
            Self::PropertyValueChange => "PropertyValueChange",
            Self::PropertyListInsert => "PropertyListInsert",
            Self::PropertyListDelete => "PropertyListDelete",
            Self::PropertyListReplace => "PropertyListReplace",
        };
        write!(f, "{s}")
    }
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::ObjectAdded { .. } => MutationKind::ObjectAdded,
            Self::ObjectRemoved { .. } => MutationKind::ObjectRemoved,
            Self::PropertyValueChange { .. } => MutationKind::PropertyValueChange,
            Self::PropertyListInsert { .. } => MutationKind::PropertyListInsert,
            Self::PropertyListDelete { .. } => MutationKind::PropertyListDelete,
            Self::PropertyListReplace { .. } => MutationKind::PropertyListReplace,
        }
    }

    /// The node whose state this event changes.
    pub fn target(&self) -> NodeId {
        match self {
            Self::ObjectAdded { node } | Self::ObjectRemoved { node } => node.id,
            Self::PropertyValueChange { id, .. }
            | Self::PropertyListInsert { id, .. }
            | Self::PropertyListDelete { id, .. }
            | Self::PropertyListReplace { id, .. } => *id,
        }
    }

    /// Field name for property events.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ObjectAdded { .. } | Self::ObjectRemoved { .. } => None,
            Self::PropertyValueChange { field, .. }
            | Self::PropertyListInsert { field, .. }
            | Self::PropertyListDelete { field, .. }
            | Self::PropertyListReplace { field, .. } => Some(field),
        }
    }

    /// The event that exactly undoes this one.
    pub fn inverse(&self) -> Mutation {
        match self.clone() {
            Self::ObjectAdded { node } => Self::ObjectRemoved { node },
            Self::ObjectRemoved { node } => Self::ObjectAdded { node },
            Self::PropertyValueChange { id, field, old, new } => Self::PropertyValueChange {
                id,
                field,
                old: new,
                new: old,
            },
            Self::PropertyListInsert {
                id,
                field,
                index,
                value,
            } => Self::PropertyListDelete {
                id,
                field,
                index,
                old: value,
            },
            Self::PropertyListDelete {
                id,
                field,
                index,
                old,
            } => Self::PropertyListInsert {
                id,
                field,
                index,
                value: old,
            },
            Self::PropertyListReplace {
                id,
                field,
                index,
                old,
                new,
            } => Self::PropertyListReplace {
                id,
                field,
                index,
                old: new,
                new: old,
            },
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectAdded { node } => write!(f, "ObjectAdded({} {})", node.id, node.class),
            Self::ObjectRemoved { node } => {
                write!(f, "ObjectRemoved({} {})", node.id, node.class)
            }
            Self::PropertyValueChange { id, field, old, new } => {
                write!(f, "PropertyValueChange({id}, {field:?}, {old}, {new})")
            }
            Self::PropertyListInsert {
                id,
                field,
                index,
                value,
            } => write!(f, "PropertyListInsert({id}, {field:?}, {index}, {value})"),
            Self::PropertyListDelete {
                id,
                field,
                index,
                old,
            } => write!(f, "PropertyListDelete({id}, {field:?}, {index}, {old})"),
            Self::PropertyListReplace {
                id,
                field,
                index,
                old,
                new,
            } => write!(
                f,
                "PropertyListReplace({id}, {field:?}, {index}, {old}, {new})"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stave_types::Value;

    fn rename(id: NodeId) -> Mutation {
        Mutation::PropertyValueChange {
            id,
            field: "name".into(),
            old: FieldValue::from("A"),
            new: FieldValue::from("B"),
        }
    }

    #[test]
    fn inverse_swaps_old_and_new() {
        let id = NodeId::random();
        let inv = rename(id).inverse();
        assert_eq!(
            inv,
            Mutation::PropertyValueChange {
                id,
                field: "name".into(),
                old: FieldValue::from("B"),
                new: FieldValue::from("A"),
            }
        );
        assert_eq!(inv.inverse(), rename(id));
    }

    #[test]
    fn list_insert_inverts_to_delete() {
        let id = NodeId::random();
        let ins = Mutation::PropertyListInsert {
            id,
            field: "tags".into(),
            index: 2,
            value: Element::Value(Value::from("live")),
        };
        let inv = ins.inverse();
        assert_eq!(inv.kind(), MutationKind::PropertyListDelete);
        assert_eq!(inv.target(), id);
        assert_eq!(inv.field(), Some("tags"));
        assert_eq!(inv.inverse(), ins);
    }

    #[test]
    fn display_is_readable() {
        let id = NodeId::from_raw(1).unwrap();
        assert_eq!(
            rename(id).to_string(),
            "PropertyValueChange(n:0000000000000001, \"name\", \"A\", \"B\")"
        );
    }
}
