use serde::{Deserialize, Serialize};
use stave_types::{NodeId, Value};

use crate::class::NodeClass;
use crate::field::{FieldSet, FieldValue};
use crate::schema::FieldSpec;

/// Back-pointer from a child to the field that owns it.
///
/// The owner is stored by identity and resolved through the pool; the link
/// is never followed for ownership or serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub owner: NodeId,
    /// Position of the owning field in the owner's schema.
    pub field: usize,
    /// Position inside an owned-child list, `None` for a single child slot.
    pub index: Option<usize>,
}

/// One schema-typed node held by a [`Pool`](crate::Pool).
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectNode {
    pub(crate) id: NodeId,
    pub(crate) class: NodeClass,
    pub(crate) fields: FieldSet,
    pub(crate) parent: Option<ParentLink>,
}

impl ObjectNode {
    pub(crate) fn from_record(record: NodeRecord) -> Self {
        Self {
            id: record.id,
            class: record.class,
            fields: FieldSet::new(record.fields),
            parent: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    pub fn parent(&self) -> Option<ParentLink> {
        self.parent
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Field value by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        let (idx, _) = self.class.schema().field(name)?;
        self.fields.get(idx)
    }

    /// Field specs paired with their values, in declared order.
    pub fn named_fields(&self) -> impl Iterator<Item = (&'static FieldSpec, &FieldValue)> {
        self.class.schema().fields.iter().zip(self.fields.iter())
    }

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.field(name)?.as_scalar()
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.scalar(name)?.as_text()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.scalar(name)?.as_int()
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.scalar(name)?.as_float()
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.scalar(name)?.as_bool()
    }

    /// Every owned child, in declared field order then list order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.fields
            .iter()
            .flat_map(|v| v.owned_children().iter().copied())
    }

    /// Every weak reference with the index of the field holding it.
    pub fn references(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.fields
            .iter()
            .enumerate()
            .flat_map(|(idx, v)| v.references().iter().map(move |t| (idx, *t)))
    }

    pub fn has_children(&self) -> bool {
        self.children().next().is_some()
    }

    /// Detached, serializable copy of this node.
    pub fn record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id,
            class: self.class,
            fields: self.fields.as_slice().to_vec(),
        }
    }
}

/// Serializable form of a node: identity, class, and positional fields.
///
/// Parent links are not part of the record; they are derived from the
/// owner's child fields whenever records are loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub class: NodeClass,
    pub fields: Vec<FieldValue>,
}

impl NodeRecord {
    /// Field value by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        let (idx, _) = self.class.schema().field(name)?;
        self.fields.get(idx)
    }
}
