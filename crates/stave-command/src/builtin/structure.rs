use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use stave_pool::{FieldKind, FieldValue, NodeArgs, NodeClass, Pool};
use stave_types::NodeId;

use super::{check_index, field_kind};
use crate::command::Command;
use crate::error::{CommandError, CommandResult};

/// Child at `index` of an owned-child field; a single slot answers index 0.
fn child_at(
    command: &str,
    pool: &Pool,
    parent: NodeId,
    field: &str,
    index: usize,
) -> CommandResult<NodeId> {
    match pool.field(parent, field)? {
        FieldValue::ChildList(children) => {
            check_index(command, index, children.len(), false)?;
            Ok(children[index])
        }
        FieldValue::Child(Some(child)) if index == 0 => Ok(*child),
        FieldValue::Child(_) => Err(CommandError::rejected(
            command,
            format!("{field} holds no child at {index}"),
        )),
        _ => Err(CommandError::rejected(
            command,
            format!("{field} is not an owned-child field"),
        )),
    }
}

/// Name of the owner field holding `node`, with the node's list index.
fn owner_slot(pool: &Pool, node: NodeId) -> Option<(NodeId, &'static str, Option<usize>)> {
    let link = pool.get(node).ok()?.parent()?;
    let spec = pool.get(link.owner).ok()?.class().schema().fields.get(link.field)?;
    Some((link.owner, spec.name, link.index))
}

/// Create a node of `class` and attach it to `field` of the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsertChild {
    pub field: String,
    pub index: usize,
    pub class: NodeClass,
    pub args: NodeArgs,
}

impl InsertChild {
    pub fn new(field: impl Into<String>, index: usize, class: NodeClass) -> Self {
        Self {
            field: field.into(),
            index,
            class,
            args: NodeArgs::new(),
        }
    }

    pub fn with_args(mut self, args: NodeArgs) -> Self {
        self.args = args;
        self
    }
}

impl Command for InsertChild {
    const NAME: &'static str = "InsertChild";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let kind = field_kind(pool, target, &self.field, Self::NAME)?;
        let accepted = kind.child_class().ok_or_else(|| {
            CommandError::rejected(Self::NAME, format!("{} is a {kind} field", self.field))
        })?;
        if accepted != self.class {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{} holds {accepted}, not {}", self.field, self.class),
            ));
        }
        match pool.field(target, &self.field)? {
            FieldValue::ChildList(children) => {
                check_index(Self::NAME, self.index, children.len(), true)?
            }
            FieldValue::Child(Some(occupant)) => {
                return Err(CommandError::rejected(
                    Self::NAME,
                    format!("{} is occupied by {occupant}", self.field),
                ))
            }
            _ => check_index(Self::NAME, self.index, 0, true)?,
        }
        self.class.schema().build(&self.args)?;
        for (name, value) in self.args.iter() {
            if let Some(missing) = value.references().iter().find(|t| !pool.contains(**t)) {
                return Err(CommandError::rejected(
                    Self::NAME,
                    format!("{name} refers to missing node {missing}"),
                ));
            }
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        let child = pool.create(self.class, &self.args)?;
        let index = match field_kind(pool, target, &self.field, Self::NAME)? {
            FieldKind::ChildList(_) => Some(self.index),
            _ => None,
        };
        pool.attach_child(target, &self.field, child, index)?;
        Ok(())
    }
}

/// Delete the child at `index` of `field` on the target, with its subtree.
///
/// Refused while any node outside the subtree still refers into it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteChild {
    pub field: String,
    pub index: usize,
}

impl Command for DeleteChild {
    const NAME: &'static str = "DeleteChild";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let child = child_at(Self::NAME, pool, target, &self.field, self.index)?;
        let subtree: HashSet<NodeId> = pool.subtree_ids(child).into_iter().collect();
        for node in &subtree {
            if let Some((holder, field)) = pool
                .references_to(*node)
                .into_iter()
                .find(|(holder, _)| !subtree.contains(holder))
            {
                return Err(CommandError::rejected(
                    Self::NAME,
                    format!("{node} is still referenced by {holder}.{field}"),
                ));
            }
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        let child = child_at(Self::NAME, pool, target, &self.field, self.index)?;
        pool.delete(child)?;
        Ok(())
    }
}

/// Move the target under `field` of `to`.
///
/// For child lists `index` is counted after the target has left its
/// current place; `None` appends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveChild {
    pub to: NodeId,
    pub field: String,
    pub index: Option<usize>,
}

impl Command for MoveChild {
    const NAME: &'static str = "MoveChild";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let node = pool.get(target)?;
        let Some((owner, owner_field, _)) = owner_slot(pool, target) else {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{target} is not attached"),
            ));
        };
        let kind = field_kind(pool, self.to, &self.field, Self::NAME)?;
        if kind.child_class() != Some(node.class()) {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{} cannot hold a {}", self.field, node.class()),
            ));
        }
        if self.to == target || pool.ancestors(self.to).contains(&target) {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{target} cannot be moved under itself"),
            ));
        }
        let same_field = owner == self.to && owner_field == self.field;
        match pool.field(self.to, &self.field)? {
            FieldValue::ChildList(children) => {
                let len = children.len() - usize::from(same_field);
                if let Some(index) = self.index {
                    check_index(Self::NAME, index, len, true)?;
                }
            }
            FieldValue::Child(occupant) => {
                if self.index.is_some() {
                    return Err(CommandError::rejected(
                        Self::NAME,
                        format!("{} is a single child slot", self.field),
                    ));
                }
                if let Some(occupant) = occupant.filter(|_| !same_field) {
                    return Err(CommandError::rejected(
                        Self::NAME,
                        format!("{} is occupied by {occupant}", self.field),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        pool.move_child(target, self.to, &self.field, self.index)?;
        Ok(())
    }
}

/// Copy the target's subtree and insert the copy right after it.
///
/// Unless `keep_external_refs` is set, a subtree that refers to nodes
/// outside itself is refused. Kept external references point at the same
/// targets as the originals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DuplicateChild {
    pub keep_external_refs: bool,
}

impl Command for DuplicateChild {
    const NAME: &'static str = "DuplicateChild";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        match owner_slot(pool, target) {
            Some((_, _, Some(_))) => {}
            Some(_) => {
                return Err(CommandError::rejected(
                    Self::NAME,
                    "a single child slot cannot hold a copy",
                ))
            }
            None => {
                pool.get(target)?;
                return Err(CommandError::rejected(
                    Self::NAME,
                    format!("{target} is not attached"),
                ));
            }
        }
        if self.keep_external_refs {
            return Ok(());
        }
        let subtree = pool.subtree_ids(target);
        let inside: HashSet<NodeId> = subtree.iter().copied().collect();
        for id in subtree {
            if let Some((_, outside)) = pool
                .get(id)?
                .references()
                .find(|(_, t)| !inside.contains(t))
            {
                return Err(CommandError::rejected(
                    Self::NAME,
                    format!("{id} refers to {outside} outside the copied subtree"),
                ));
            }
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        let (owner, field, index) = owner_slot(pool, target).ok_or_else(|| {
            CommandError::rejected(Self::NAME, format!("{target} is not attached"))
        })?;
        let copy = pool.clone_subtree(target)?;
        pool.attach_child(owner, field, copy.root, index.map(|i| i + 1))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use stave_pool::{Element, Mutation, PoolError};
    use stave_types::ErrorKind;

    use super::*;
    use crate::builtin::testing::song;
    use crate::executor::execute;

    #[test]
    fn insert_child_at_index() {
        let (mut pool, track, measure) = song();
        let done = execute(
            &mut pool,
            track,
            &InsertChild::new("measures", 0, NodeClass::Measure),
        )
        .unwrap();
        assert_eq!(done.minted.len(), 1);
        assert!(matches!(done.events[0], Mutation::ObjectAdded { .. }));
        assert_eq!(
            pool.field(track, "measures").unwrap(),
            &FieldValue::ChildList(vec![done.minted[0], measure])
        );
        pool.check_integrity().unwrap();
    }

    #[test]
    fn insert_child_rejections() {
        let (mut pool, track, measure) = song();
        let err = execute(
            &mut pool,
            track,
            &InsertChild::new("measures", 5, NodeClass::Measure),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CommandError::rejected("InsertChild", "index 5 out of bounds [0, 1]")
        );

        let err = execute(
            &mut pool,
            track,
            &InsertChild::new("measures", 0, NodeClass::Note),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);

        // Note requires a pitch.
        let err = execute(&mut pool, measure, &InsertChild::new("notes", 0, NodeClass::Note))
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Pool(PoolError::SchemaViolation { .. })
        ));

        let ok = InsertChild::new("notes", 3, NodeClass::Note)
            .with_args(NodeArgs::new().set("pitch", 67i64));
        execute(&mut pool, measure, &ok).unwrap();
        assert_eq!(pool.list_len(measure, "notes").unwrap(), 4);
    }

    #[test]
    fn insert_into_single_slot() {
        let (mut pool, _, _) = song();
        let root = pool.root();
        execute(&mut pool, root, &InsertChild::new("metadata", 0, NodeClass::Metadata)).unwrap();
        let err = execute(&mut pool, root, &InsertChild::new("metadata", 0, NodeClass::Metadata))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
    }

    #[test]
    fn delete_child_removes_subtree() {
        let (mut pool, track, _) = song();
        let before = pool.len();
        let done = execute(
            &mut pool,
            track,
            &DeleteChild {
                field: "measures".into(),
                index: 0,
            },
        )
        .unwrap();
        assert_eq!(pool.len(), before - 4);
        let removed = done
            .events
            .iter()
            .filter(|e| matches!(e, Mutation::ObjectRemoved { .. }))
            .count();
        assert_eq!(removed, 4);
        pool.check_integrity().unwrap();
    }

    #[test]
    fn delete_child_refuses_referenced_subtree() {
        let (mut pool, track, measure) = song();
        let root = pool.root();
        let note = pool.get(measure).unwrap().children().next().unwrap();
        pool.list_insert(root, "selection", 0, Element::Node(note))
            .unwrap();
        pool.take_journal();

        let err = execute(
            &mut pool,
            track,
            &DeleteChild {
                field: "measures".into(),
                index: 0,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
        assert!(pool.contains(note));
    }

    #[test]
    fn move_child_between_parents_and_within_list() {
        let (mut pool, track, measure) = song();
        let second = execute(
            &mut pool,
            track,
            &InsertChild::new("measures", 1, NodeClass::Measure),
        )
        .unwrap()
        .minted[0];
        let note = pool.get(measure).unwrap().children().next().unwrap();

        execute(
            &mut pool,
            note,
            &MoveChild {
                to: second,
                field: "notes".into(),
                index: None,
            },
        )
        .unwrap();
        assert_eq!(pool.list_len(measure, "notes").unwrap(), 2);
        assert_eq!(pool.get(note).unwrap().parent().unwrap().owner, second);

        // Reorder within the same list: index counts after removal.
        execute(
            &mut pool,
            measure,
            &MoveChild {
                to: track,
                field: "measures".into(),
                index: Some(1),
            },
        )
        .unwrap();
        assert_eq!(
            pool.field(track, "measures").unwrap(),
            &FieldValue::ChildList(vec![second, measure])
        );
        pool.check_integrity().unwrap();
    }

    #[test]
    fn move_child_rejects_cycles_and_roots() {
        let (mut pool, track, measure) = song();
        let root = pool.root();
        let err = execute(
            &mut pool,
            track,
            &MoveChild {
                to: measure,
                field: "notes".into(),
                index: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);

        let err = execute(
            &mut pool,
            root,
            &MoveChild {
                to: track,
                field: "measures".into(),
                index: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
    }

    #[test]
    fn duplicate_child_inserts_copy_after_original() {
        let (mut pool, track, measure) = song();
        let done = execute(
            &mut pool,
            measure,
            &DuplicateChild {
                keep_external_refs: false,
            },
        )
        .unwrap();
        assert_eq!(done.minted.len(), 4);
        let measures = pool.field(track, "measures").unwrap().owned_children().to_vec();
        assert_eq!(measures[0], measure);

        let originals = pool.subtree_ids(measures[0]);
        let copies = pool.subtree_ids(measures[1]);
        assert_eq!(originals.len(), copies.len());
        for (a, b) in originals.iter().zip(&copies) {
            assert_ne!(a, b);
            let (a, b) = (pool.get(*a).unwrap(), pool.get(*b).unwrap());
            assert_eq!(a.class(), b.class());
            assert_eq!(a.int("pitch"), b.int("pitch"));
        }
        pool.check_integrity().unwrap();
    }

    #[test]
    fn duplicate_child_external_refs() {
        let (mut pool, track, _) = song();
        let root = pool.root();
        pool.set(track, "output", FieldValue::Ref(Some(root))).unwrap();
        pool.take_journal();

        let refuse = DuplicateChild {
            keep_external_refs: false,
        };
        let err = execute(&mut pool, track, &refuse).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);

        let done = execute(
            &mut pool,
            track,
            &DuplicateChild {
                keep_external_refs: true,
            },
        )
        .unwrap();
        let copy = pool.field(root, "tracks").unwrap().owned_children()[1];
        assert!(done.minted.contains(&copy));
        assert_eq!(pool.resolve(copy, "output").unwrap().map(|n| n.id()), Some(root));
        assert_eq!(pool.references_to(root).len(), 2);
    }

    #[test]
    fn duplicate_root_is_rejected() {
        let (mut pool, _, _) = song();
        let root = pool.root();
        let err = execute(
            &mut pool,
            root,
            &DuplicateChild {
                keep_external_refs: true,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
    }
}
