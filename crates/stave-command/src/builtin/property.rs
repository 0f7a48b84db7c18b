use serde::{Deserialize, Serialize};
use stave_pool::{Element, FieldKind, FieldValue, Pool};
use stave_types::{NodeId, Value};

use super::{check_index, field_kind};
use crate::command::Command;
use crate::error::{CommandError, CommandResult};

/// Set the `name` text field of the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rename {
    pub new_name: String,
}

impl Command for Rename {
    const NAME: &'static str = "Rename";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let node = pool.get(target)?;
        if node.text("name").is_none() {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{} has no name", node.class()),
            ));
        }
        if self.new_name.trim().is_empty() {
            return Err(CommandError::rejected(Self::NAME, "name must not be empty"));
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        pool.set(target, "name", self.new_name.as_str())?;
        Ok(())
    }
}

/// Replace a scalar or wrapped field of the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetProperty {
    pub field: String,
    pub value: FieldValue,
}

impl Command for SetProperty {
    const NAME: &'static str = "SetProperty";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let kind = field_kind(pool, target, &self.field, Self::NAME)?;
        if !matches!(kind, FieldKind::Scalar(_) | FieldKind::Wrapped(_)) {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{} is a {kind} field", self.field),
            ));
        }
        self.value
            .conforms_to(&kind)
            .map_err(|reason| CommandError::rejected(Self::NAME, reason))
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        pool.set(target, &self.field, self.value.clone())?;
        Ok(())
    }
}

/// Point a single-reference field at another node, or clear it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetReference {
    pub field: String,
    pub to: Option<NodeId>,
}

impl Command for SetReference {
    const NAME: &'static str = "SetReference";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let kind = field_kind(pool, target, &self.field, Self::NAME)?;
        if kind != FieldKind::Ref {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{} is a {kind} field", self.field),
            ));
        }
        match self.to {
            Some(to) if !pool.contains(to) => Err(CommandError::rejected(
                Self::NAME,
                format!("reference target {to} does not exist"),
            )),
            _ => Ok(()),
        }
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        pool.set(target, &self.field, FieldValue::Ref(self.to))?;
        Ok(())
    }
}

/// Check that `value` may be stored in a list field of `kind`.
fn check_element(command: &str, pool: &Pool, kind: FieldKind, value: &Element) -> CommandResult<()> {
    match (kind, value) {
        (FieldKind::ScalarList(t), Element::Value(v)) if v.scalar_type() == t => Ok(()),
        (FieldKind::RefList, Element::Node(id)) if pool.contains(*id) => Ok(()),
        (FieldKind::RefList, Element::Node(id)) => Err(CommandError::rejected(
            command,
            format!("reference target {id} does not exist"),
        )),
        (FieldKind::ScalarList(_) | FieldKind::RefList, other) => Err(CommandError::rejected(
            command,
            format!("cannot store {other} in a {kind} field"),
        )),
        _ => Err(CommandError::rejected(
            command,
            format!("{kind} is not a value list"),
        )),
    }
}

fn value_list(command: &str, pool: &Pool, target: NodeId, field: &str) -> CommandResult<(FieldKind, usize)> {
    let kind = field_kind(pool, target, field, command)?;
    if !matches!(kind, FieldKind::ScalarList(_) | FieldKind::RefList) {
        return Err(CommandError::rejected(
            command,
            format!("{field} is a {kind} field"),
        ));
    }
    Ok((kind, pool.list_len(target, field)?))
}

/// Insert into a scalar or reference list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsertListValue {
    pub field: String,
    pub index: usize,
    pub value: Element,
}

impl InsertListValue {
    /// Insert a text value.
    pub fn text(field: impl Into<String>, index: usize, text: &str) -> Self {
        Self {
            field: field.into(),
            index,
            value: Element::Value(Value::from(text)),
        }
    }
}

impl Command for InsertListValue {
    const NAME: &'static str = "InsertListValue";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let (kind, len) = value_list(Self::NAME, pool, target, &self.field)?;
        check_index(Self::NAME, self.index, len, true)?;
        check_element(Self::NAME, pool, kind, &self.value)
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        pool.list_insert(target, &self.field, self.index, self.value.clone())?;
        Ok(())
    }
}

/// Remove one item of a scalar or reference list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteListValue {
    pub field: String,
    pub index: usize,
}

impl Command for DeleteListValue {
    const NAME: &'static str = "DeleteListValue";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let (_, len) = value_list(Self::NAME, pool, target, &self.field)?;
        check_index(Self::NAME, self.index, len, false)
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        pool.list_delete(target, &self.field, self.index)?;
        Ok(())
    }
}

/// Replace one item of a scalar or reference list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplaceListValue {
    pub field: String,
    pub index: usize,
    pub value: Element,
}

impl Command for ReplaceListValue {
    const NAME: &'static str = "ReplaceListValue";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let (kind, len) = value_list(Self::NAME, pool, target, &self.field)?;
        check_index(Self::NAME, self.index, len, false)?;
        check_element(Self::NAME, pool, kind, &self.value)
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        pool.list_replace(target, &self.field, self.index, self.value.clone())?;
        Ok(())
    }
}
