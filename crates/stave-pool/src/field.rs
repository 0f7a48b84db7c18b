use std::fmt;

use serde::{Deserialize, Serialize};
use stave_types::{NodeId, Value, Wrapped};

use crate::schema::FieldKind;

/// Stored value of one field. The variant mirrors the field's [`FieldKind`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Scalar(Value),
    ScalarList(Vec<Value>),
    Child(Option<NodeId>),
    ChildList(Vec<NodeId>),
    Ref(Option<NodeId>),
    RefList(Vec<NodeId>),
    Wrapped(Wrapped),
}

impl FieldValue {
    /// Check this value against a field kind. Returns a reason on mismatch.
    pub fn conforms_to(&self, kind: &FieldKind) -> Result<(), String> {
        match (self, kind) {
            (Self::Scalar(v), FieldKind::Scalar(t)) if v.scalar_type() == *t => Ok(()),
            (Self::ScalarList(vs), FieldKind::ScalarList(t)) => {
                match vs.iter().position(|v| v.scalar_type() != *t) {
                    None => Ok(()),
                    Some(i) => Err(format!(
                        "list item {i} is {}, expected {t}",
                        vs[i].scalar_type()
                    )),
                }
            }
            (Self::Child(_), FieldKind::Child(_))
            | (Self::ChildList(_), FieldKind::ChildList(_))
            | (Self::Ref(_), FieldKind::Ref)
            | (Self::RefList(_), FieldKind::RefList) => Ok(()),
            (Self::Wrapped(w), FieldKind::Wrapped(name)) if w.type_name() == *name => Ok(()),
            (value, kind) => Err(format!("expected {kind}, found {}", value.describe())),
        }
    }

    /// Owned children held by this value, in order.
    pub fn owned_children(&self) -> &[NodeId] {
        match self {
            Self::Child(Some(id)) => std::slice::from_ref(id),
            Self::ChildList(ids) => ids,
            _ => &[],
        }
    }

    /// Weak references held by this value, in order.
    pub fn references(&self) -> &[NodeId] {
        match self {
            Self::Ref(Some(id)) => std::slice::from_ref(id),
            Self::RefList(ids) => ids,
            _ => &[],
        }
    }

    /// Length of a list value.
    pub fn list_len(&self) -> Option<usize> {
        match self {
            Self::ScalarList(v) => Some(v.len()),
            Self::ChildList(v) | Self::RefList(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Element at `index` of a list value.
    pub fn element(&self, index: usize) -> Option<Element> {
        match self {
            Self::ScalarList(v) => v.get(index).cloned().map(Element::Value),
            Self::ChildList(v) | Self::RefList(v) => v.get(index).copied().map(Element::Node),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Scalar(v) => v.scalar_type().to_string(),
            Self::ScalarList(_) => "scalar list".into(),
            Self::Child(_) => "child".into(),
            Self::ChildList(_) => "child list".into(),
            Self::Ref(_) => "ref".into(),
            Self::RefList(_) => "ref list".into(),
            Self::Wrapped(w) => format!("wrapped<{}>", w.type_name()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, "]")
        }
        match self {
            Self::Scalar(v) => write!(f, "{v}"),
            Self::ScalarList(vs) => list(f, vs),
            Self::Child(Some(id)) | Self::Ref(Some(id)) => write!(f, "{id}"),
            Self::Child(None) | Self::Ref(None) => write!(f, "none"),
            Self::ChildList(ids) | Self::RefList(ids) => list(f, ids),
            Self::Wrapped(w) => write!(f, "{w}"),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        Self::Scalar(v)
    }
}

impl From<Wrapped> for FieldValue {
    fn from(w: Wrapped) -> Self {
        Self::Wrapped(w)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Scalar(Value::from(s))
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Scalar(Value::from(s))
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Scalar(Value::Int(i))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Scalar(Value::Float(v))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Scalar(Value::Bool(b))
    }
}

/// One item of a list-valued field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Element {
    /// Item of a scalar list.
    Value(Value),
    /// Item of an owned-child list or a reference list.
    Node(NodeId),
}

impl Element {
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Value(_) => None,
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Node(id) => write!(f, "{id}"),
        }
    }
}

/// Positional field record of one node, aligned with its class schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSet(Vec<FieldValue>);

impl FieldSet {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.0.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FieldValue> {
        self.0.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldValue> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[FieldValue] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<FieldValue> {
        self.0
    }
}

/// Named arguments for creating a node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeArgs(Vec<(String, FieldValue)>);

impl NodeArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
