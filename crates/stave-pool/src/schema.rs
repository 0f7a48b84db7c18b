//! Declarative property schemas.
//!
//! A [`ClassSchema`] lists the typed, named fields of one node class. Schemas
//! are plain static data: they describe shape and defaults and carry no
//! behavior beyond an optional per-class initializer.

use std::fmt;

use stave_types::ScalarType;

use crate::class::NodeClass;
use crate::error::{PoolError, PoolResult};
use crate::field::{FieldSet, FieldValue, NodeArgs};

/// Kind of a schema field, which fixes its cardinality and ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// One scalar value, replaced whole.
    Scalar(ScalarType),
    /// Ordered list of scalars, edited per index.
    ScalarList(ScalarType),
    /// Zero or one owned child of the given class.
    Child(NodeClass),
    /// Ordered list of owned children of the given class.
    ChildList(NodeClass),
    /// Zero or one non-owning reference, resolved by id.
    Ref,
    /// Ordered list of non-owning references.
    RefList,
    /// Opaque value type identified by its type name.
    Wrapped(&'static str),
}

impl FieldKind {
    /// Value a field of this kind holds when nothing was supplied, if any.
    ///
    /// Scalar and wrapped fields have no natural empty value; they need an
    /// explicit default or are required.
    pub fn empty_value(&self) -> Option<FieldValue> {
        match self {
            Self::Scalar(_) | Self::Wrapped(_) => None,
            Self::ScalarList(_) => Some(FieldValue::ScalarList(Vec::new())),
            Self::Child(_) => Some(FieldValue::Child(None)),
            Self::ChildList(_) => Some(FieldValue::ChildList(Vec::new())),
            Self::Ref => Some(FieldValue::Ref(None)),
            Self::RefList => Some(FieldValue::RefList(Vec::new())),
        }
    }

    /// Returns `true` for fields whose values are lifetime-owned children.
    pub fn owns_children(&self) -> bool {
        matches!(self, Self::Child(_) | Self::ChildList(_))
    }

    /// Returns `true` for fields edited per index.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::ScalarList(_) | Self::ChildList(_) | Self::RefList
        )
    }

    /// Class accepted by an owned-child field.
    pub fn child_class(&self) -> Option<NodeClass> {
        match self {
            Self::Child(c) | Self::ChildList(c) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(t) => write!(f, "{t}"),
            Self::ScalarList(t) => write!(f, "[{t}]"),
            Self::Child(c) => write!(f, "child<{c}>"),
            Self::ChildList(c) => write!(f, "children<{c}>"),
            Self::Ref => write!(f, "ref"),
            Self::RefList => write!(f, "[ref]"),
            Self::Wrapped(name) => write!(f, "wrapped<{name}>"),
        }
    }
}

/// One named field of a class.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    default: Option<fn() -> FieldValue>,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    pub const fn with_default(mut self, default: fn() -> FieldValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Returns `true` if node creation must supply this field.
    pub fn is_required(&self) -> bool {
        self.default.is_none() && self.kind.empty_value().is_none()
    }

    /// Value used when creation does not supply the field.
    pub fn initial_value(&self) -> Option<FieldValue> {
        match self.default {
            Some(default) => Some(default()),
            None => self.kind.empty_value(),
        }
    }
}

/// Static description of one node class.
#[derive(Debug)]
pub struct ClassSchema {
    pub class: NodeClass,
    pub fields: &'static [FieldSpec],
    /// Runs once on every freshly created node, after defaults are applied.
    pub init: Option<fn(&mut FieldSet)>,
}

impl ClassSchema {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<(usize, &'static FieldSpec)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, spec)| spec.name == name)
    }

    /// Index of a field, or [`PoolError::UnknownField`].
    pub fn field_index(&self, name: &str) -> PoolResult<usize> {
        self.field(name)
            .map(|(idx, _)| idx)
            .ok_or_else(|| PoolError::UnknownField {
                class: self.class,
                field: name.to_string(),
            })
    }

    /// Build the field set of a new node from creation arguments.
    ///
    /// Owned-child fields cannot be set at creation: children are attached
    /// afterwards so the single-owner rule is enforced in one place.
    pub fn build(&self, args: &NodeArgs) -> PoolResult<FieldSet> {
        let mut values: Vec<Option<FieldValue>> = vec![None; self.fields.len()];

        for (name, value) in args.iter() {
            let idx = self.field_index(name)?;
            let spec = &self.fields[idx];
            if spec.kind.owns_children() {
                return Err(PoolError::schema(
                    self.class,
                    name,
                    "owned children are attached after creation",
                ));
            }
            value
                .conforms_to(&spec.kind)
                .map_err(|reason| PoolError::schema(self.class, name, reason))?;
            if values[idx].is_some() {
                return Err(PoolError::schema(self.class, name, "field given twice"));
            }
            values[idx] = Some(value.clone());
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for (spec, value) in self.fields.iter().zip(values) {
            match value.or_else(|| spec.initial_value()) {
                Some(v) => fields.push(v),
                None => {
                    return Err(PoolError::schema(
                        self.class,
                        spec.name,
                        "required field missing",
                    ))
                }
            }
        }

        let mut set = FieldSet::new(fields);
        if let Some(init) = self.init {
            init(&mut set);
        }
        Ok(set)
    }

    /// Check that a positional field record matches this schema.
    pub fn check_fields(&self, fields: &[FieldValue]) -> PoolResult<()> {
        if fields.len() != self.fields.len() {
            return Err(PoolError::CorruptSnapshot(format!(
                "{} record has {} fields, schema declares {}",
                self.class,
                fields.len(),
                self.fields.len()
            )));
        }
        for (spec, value) in self.fields.iter().zip(fields) {
            value
                .conforms_to(&spec.kind)
                .map_err(|reason| PoolError::schema(self.class, spec.name, reason))?;
        }
        Ok(())
    }
}
