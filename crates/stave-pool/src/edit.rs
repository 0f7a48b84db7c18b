//! Mutating pool operations.
//!
//! Each operation reads the current state, builds the events that describe
//! the change, and emits them. Validation happens when an event is applied.

use stave_types::NodeId;
use tracing::debug;

use crate::class::NodeClass;
use crate::error::{PoolError, PoolResult};
use crate::field::{Element, FieldValue, NodeArgs};
use crate::mutation::Mutation;
use crate::node::{NodeRecord, ObjectNode};
use crate::pool::Pool;
use crate::schema::FieldKind;

impl Pool {
    /// Create a floating node of `class` from `args`.
    ///
    /// The node must be attached before the enclosing command ends.
    pub fn create(&mut self, class: NodeClass, args: &NodeArgs) -> PoolResult<NodeId> {
        let schema = class.schema();
        let fields = schema.build(args)?;
        let id = self.mint_id()?;
        for (idx, value) in fields.iter().enumerate() {
            if let Some(target) = value.references().iter().find(|t| !self.contains(**t)) {
                return Err(PoolError::DanglingReference {
                    holder: id,
                    field: schema.fields[idx].name.to_string(),
                    target: *target,
                });
            }
        }
        let node = NodeRecord {
            id,
            class,
            fields: fields.into_vec(),
        };
        self.emit(Mutation::ObjectAdded { node })?;
        debug!(%id, %class, "created node");
        Ok(id)
    }

    /// Replace the whole value of a scalar, wrapped, or reference field.
    pub fn set(&mut self, id: NodeId, field: &str, value: impl Into<FieldValue>) -> PoolResult<()> {
        let value = value.into();
        let (idx, spec) = self.slot(id, field)?;
        let class = self.get(id)?.class;
        if spec.kind.owns_children() {
            return Err(PoolError::schema(
                class,
                field,
                "owned children change through attach and detach",
            ));
        }
        if let FieldValue::Ref(Some(target)) = value {
            if !self.contains(target) {
                return Err(PoolError::DanglingReference {
                    holder: id,
                    field: field.to_string(),
                    target,
                });
            }
        }
        let old = self.value_at(id, idx)?.clone();
        self.emit(Mutation::PropertyValueChange {
            id,
            field: field.to_string(),
            old,
            new: value,
        })
    }

    fn check_value_list(&self, id: NodeId, field: &str) -> PoolResult<FieldKind> {
        let (_, spec) = self.slot(id, field)?;
        match spec.kind {
            FieldKind::ScalarList(_) | FieldKind::RefList => Ok(spec.kind),
            FieldKind::ChildList(_) => Err(PoolError::schema(
                self.get(id)?.class,
                field,
                "owned children change through attach and detach",
            )),
            _ => Err(PoolError::schema(self.get(id)?.class, field, "not a list field")),
        }
    }

    fn check_ref_target(&self, id: NodeId, field: &str, element: &Element) -> PoolResult<()> {
        match element {
            Element::Node(target) if !self.contains(*target) => {
                Err(PoolError::DanglingReference {
                    holder: id,
                    field: field.to_string(),
                    target: *target,
                })
            }
            _ => Ok(()),
        }
    }

    /// Insert into a scalar or reference list. `index == len` appends.
    pub fn list_insert(
        &mut self,
        id: NodeId,
        field: &str,
        index: usize,
        value: Element,
    ) -> PoolResult<()> {
        self.check_value_list(id, field)?;
        self.check_ref_target(id, field, &value)?;
        self.emit(Mutation::PropertyListInsert {
            id,
            field: field.to_string(),
            index,
            value,
        })
    }

    /// Remove one item of a scalar or reference list, returning it.
    pub fn list_delete(&mut self, id: NodeId, field: &str, index: usize) -> PoolResult<Element> {
        self.check_value_list(id, field)?;
        let old = self.element_at(id, field, index)?;
        self.emit(Mutation::PropertyListDelete {
            id,
            field: field.to_string(),
            index,
            old: old.clone(),
        })?;
        Ok(old)
    }

    /// Replace one item of a scalar or reference list, returning the old item.
    pub fn list_replace(
        &mut self,
        id: NodeId,
        field: &str,
        index: usize,
        value: Element,
    ) -> PoolResult<Element> {
        self.check_value_list(id, field)?;
        self.check_ref_target(id, field, &value)?;
        let old = self.element_at(id, field, index)?;
        self.emit(Mutation::PropertyListReplace {
            id,
            field: field.to_string(),
            index,
            old: old.clone(),
            new: value,
        })?;
        Ok(old)
    }

    fn element_at(&self, id: NodeId, field: &str, index: usize) -> PoolResult<Element> {
        let value = self.field(id, field)?;
        value
            .element(index)
            .ok_or_else(|| PoolError::IndexOutOfBounds {
                id,
                field: field.to_string(),
                index,
                len: value.list_len().unwrap_or(0),
            })
    }

    /// Attach a floating node to an owned-child field of `parent`.
    ///
    /// For a child list, `index` defaults to the end; for a single child
    /// slot it must be `None` and the slot must be empty.
    pub fn attach_child(
        &mut self,
        parent: NodeId,
        field: &str,
        node: NodeId,
        index: Option<usize>,
    ) -> PoolResult<()> {
        let (idx, spec) = self.slot(parent, field)?;
        let class = self.get(parent)?.class;
        let event = match (spec.kind, self.value_at(parent, idx)?) {
            (FieldKind::Child(_), FieldValue::Child(current)) => {
                if index.is_some() {
                    return Err(PoolError::schema(class, field, "single child slot has no index"));
                }
                if let Some(occupant) = current {
                    return Err(PoolError::ownership(
                        node,
                        format!("{parent}.{field} is occupied by {occupant}"),
                    ));
                }
                Mutation::PropertyValueChange {
                    id: parent,
                    field: field.to_string(),
                    old: FieldValue::Child(None),
                    new: FieldValue::Child(Some(node)),
                }
            }
            (FieldKind::ChildList(_), FieldValue::ChildList(children)) => {
                Mutation::PropertyListInsert {
                    id: parent,
                    field: field.to_string(),
                    index: index.unwrap_or(children.len()),
                    value: Element::Node(node),
                }
            }
            _ => return Err(PoolError::schema(class, field, "not an owned-child field")),
        };
        self.emit(event)
    }

    /// Detach a node from its owner, leaving it floating.
    ///
    /// Weak references to the node are left as they are.
    pub fn detach(&mut self, node: NodeId) -> PoolResult<()> {
        let link = self
            .get(node)?
            .parent
            .ok_or_else(|| PoolError::ownership(node, "node is not attached"))?;
        let field = self.field_name(link.owner, link.field);
        let event = match link.index {
            Some(index) => Mutation::PropertyListDelete {
                id: link.owner,
                field,
                index,
                old: Element::Node(node),
            },
            None => Mutation::PropertyValueChange {
                id: link.owner,
                field,
                old: FieldValue::Child(Some(node)),
                new: FieldValue::Child(None),
            },
        };
        self.emit(event)
    }

    /// Move an attached node under a new owner field.
    ///
    /// `index` is interpreted after the node has been detached.
    pub fn move_child(
        &mut self,
        node: NodeId,
        new_parent: NodeId,
        field: &str,
        index: Option<usize>,
    ) -> PoolResult<()> {
        self.detach(node)?;
        self.attach_child(new_parent, field, node, index)
    }

    /// Delete a node and everything it owns.
    ///
    /// The node is detached first, then its subtree is removed with
    /// descendants leaving the pool before their owners.
    pub fn delete(&mut self, id: NodeId) -> PoolResult<()> {
        if id == self.root {
            return Err(PoolError::ownership(id, "the root cannot be deleted"));
        }
        if self.get(id)?.parent.is_some() {
            self.detach(id)?;
        }
        self.remove_floating(id)?;
        debug!(%id, "deleted subtree");
        Ok(())
    }

    fn remove_floating(&mut self, id: NodeId) -> PoolResult<()> {
        let children: Vec<NodeId> = self.get(id)?.children().collect();
        for child in children.into_iter().rev() {
            self.detach(child)?;
            self.remove_floating(child)?;
        }
        let node = self.get(id).map(ObjectNode::record)?;
        self.emit(Mutation::ObjectRemoved { node })
    }
}

#[cfg(test)]
mod tests {
    use stave_types::Value;

    use super::*;

    fn project() -> Pool {
        Pool::new(NodeClass::Project, &NodeArgs::new()).unwrap()
    }

    fn add_track(pool: &mut Pool, name: &str) -> NodeId {
        let root = pool.root();
        let id = pool
            .create(NodeClass::Track, &NodeArgs::new().set("name", name))
            .unwrap();
        pool.attach_child(root, "tracks", id, None).unwrap();
        id
    }

    fn add_measure(pool: &mut Pool, track: NodeId) -> NodeId {
        let id = pool.create(NodeClass::Measure, &NodeArgs::new()).unwrap();
        pool.attach_child(track, "measures", id, None).unwrap();
        id
    }

    #[test]
    fn created_node_floats_until_attached() {
        let mut pool = project();
        let id = pool
            .create(NodeClass::Track, &NodeArgs::new().set("name", "A"))
            .unwrap();
        assert!(pool.is_floating(id));
        pool.attach_child(pool.root(), "tracks", id, None).unwrap();
        assert!(!pool.is_floating(id));
        let link = pool.get(id).unwrap().parent().unwrap();
        assert_eq!(link.owner, pool.root());
        assert_eq!(link.index, Some(0));
    }

    #[test]
    fn create_rejects_missing_reference_target() {
        let mut pool = project();
        let ghost = NodeId::from_raw(99).unwrap();
        let err = pool
            .create(
                NodeClass::Track,
                &NodeArgs::new().set("name", "A").set("output", FieldValue::Ref(Some(ghost))),
            )
            .unwrap_err();
        assert!(matches!(err, PoolError::DanglingReference { target, .. } if target == ghost));
    }

    #[test]
    fn set_emits_value_change() {
        let mut pool = project();
        let track = add_track(&mut pool, "A");
        pool.take_journal();
        pool.set(track, "name", "B").unwrap();
        assert_eq!(
            pool.take_journal(),
            vec![Mutation::PropertyValueChange {
                id: track,
                field: "name".into(),
                old: FieldValue::from("A"),
                new: FieldValue::from("B"),
            }]
        );
    }

    #[test]
    fn set_rejects_wrong_type_and_child_fields() {
        let mut pool = project();
        let track = add_track(&mut pool, "A");
        assert!(matches!(
            pool.set(track, "volume", "loud"),
            Err(PoolError::SchemaViolation { .. })
        ));
        assert!(matches!(
            pool.set(track, "measures", FieldValue::ChildList(vec![])),
            Err(PoolError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn attaching_owned_node_is_ownership_violation() {
        let mut pool = project();
        let a = add_track(&mut pool, "A");
        let b = add_track(&mut pool, "B");
        let m = add_measure(&mut pool, a);
        let err = pool.attach_child(b, "measures", m, None).unwrap_err();
        assert!(matches!(err, PoolError::OwnershipViolation { node, .. } if node == m));
    }

    #[test]
    fn attach_checks_class_and_bounds() {
        let mut pool = project();
        let track = add_track(&mut pool, "A");
        let note = pool
            .create(NodeClass::Note, &NodeArgs::new().set("pitch", 60i64))
            .unwrap();
        assert!(matches!(
            pool.attach_child(track, "measures", note, None),
            Err(PoolError::SchemaViolation { .. })
        ));
        assert!(matches!(
            pool.attach_child(track, "measures", note, Some(3)),
            Err(PoolError::IndexOutOfBounds { len: 0, .. })
        ));
    }

    #[test]
    fn attach_refuses_cycles() {
        let mut pool = project();
        let track = add_track(&mut pool, "A");
        let m = add_measure(&mut pool, track);
        let n = pool
            .create(NodeClass::Note, &NodeArgs::new().set("pitch", 60i64))
            .unwrap();
        pool.attach_child(m, "notes", n, None).unwrap();
        pool.detach(track).unwrap();
        // A floating track cannot be attached below itself.
        let err = pool.attach_child(track, "measures", track, None).unwrap_err();
        assert!(matches!(err, PoolError::SchemaViolation { .. } | PoolError::OwnershipViolation { .. }));
    }

    #[test]
    fn list_indices_stay_contiguous() {
        let mut pool = project();
        let root = pool.root();
        let a = add_track(&mut pool, "A");
        let b = add_track(&mut pool, "B");
        let c = pool
            .create(NodeClass::Track, &NodeArgs::new().set("name", "C"))
            .unwrap();
        pool.attach_child(root, "tracks", c, Some(0)).unwrap();
        let index = |pool: &Pool, id| pool.get(id).unwrap().parent().unwrap().index;
        assert_eq!(index(&pool, c), Some(0));
        assert_eq!(index(&pool, a), Some(1));
        assert_eq!(index(&pool, b), Some(2));

        pool.detach(a).unwrap();
        assert_eq!(index(&pool, b), Some(1));
        assert_eq!(pool.get(a).unwrap().parent(), None);
        pool.delete(a).unwrap();
        pool.check_integrity().unwrap();
    }

    #[test]
    fn move_child_between_owners() {
        let mut pool = project();
        let a = add_track(&mut pool, "A");
        let b = add_track(&mut pool, "B");
        let m = add_measure(&mut pool, a);
        pool.move_child(m, b, "measures", None).unwrap();
        assert_eq!(pool.list_len(a, "measures").unwrap(), 0);
        assert_eq!(pool.get(m).unwrap().parent().unwrap().owner, b);
        pool.check_integrity().unwrap();
    }

    #[test]
    fn delete_removes_descendants_first() {
        let mut pool = project();
        let track = add_track(&mut pool, "A");
        let m = add_measure(&mut pool, track);
        let n = pool
            .create(NodeClass::Note, &NodeArgs::new().set("pitch", 64i64))
            .unwrap();
        pool.attach_child(m, "notes", n, None).unwrap();
        pool.take_journal();

        pool.delete(track).unwrap();
        let removed: Vec<NodeId> = pool
            .take_journal()
            .into_iter()
            .filter_map(|e| match e {
                Mutation::ObjectRemoved { node } => Some(node.id),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec![n, m, track]);
        assert_eq!(pool.len(), 1);
        pool.check_integrity().unwrap();
    }

    #[test]
    fn root_cannot_be_deleted_or_detached() {
        let mut pool = project();
        let root = pool.root();
        assert!(matches!(pool.delete(root), Err(PoolError::OwnershipViolation { .. })));
        assert!(matches!(pool.detach(root), Err(PoolError::OwnershipViolation { .. })));
    }

    #[test]
    fn deleting_referenced_node_leaves_dangling_reference() {
        let mut pool = project();
        let root = pool.root();
        let a = add_track(&mut pool, "A");
        let b = add_track(&mut pool, "B");
        pool.set(a, "output", FieldValue::Ref(Some(b))).unwrap();
        pool.list_insert(root, "selection", 0, Element::Node(b)).unwrap();
        assert_eq!(pool.references_to(b).len(), 2);

        pool.delete(b).unwrap();
        let dangling = pool.dangling_references();
        assert_eq!(dangling.len(), 2);
        assert!(dangling.iter().all(|d| d.target == b));
        assert!(matches!(
            pool.resolve(a, "output"),
            Err(PoolError::DanglingReference { .. })
        ));

        pool.set(a, "output", FieldValue::Ref(None)).unwrap();
        pool.list_delete(root, "selection", 0).unwrap();
        assert!(pool.dangling_references().is_empty());
    }

    #[test]
    fn scalar_list_editing() {
        let mut pool = project();
        let meta = pool.create(NodeClass::Metadata, &NodeArgs::new()).unwrap();
        pool.attach_child(pool.root(), "metadata", meta, None).unwrap();
        pool.list_insert(meta, "tags", 0, Element::Value(Value::from("ambient")))
            .unwrap();
        pool.list_insert(meta, "tags", 1, Element::Value(Value::from("live")))
            .unwrap();
        let old = pool
            .list_replace(meta, "tags", 0, Element::Value(Value::from("drone")))
            .unwrap();
        assert_eq!(old, Element::Value(Value::from("ambient")));
        assert!(matches!(
            pool.list_insert(meta, "tags", 0, Element::Value(Value::Int(1))),
            Err(PoolError::SchemaViolation { .. })
        ));
        assert!(matches!(
            pool.list_delete(meta, "tags", 7),
            Err(PoolError::IndexOutOfBounds { index: 7, len: 2, .. })
        ));
        assert_eq!(
            pool.field(meta, "tags").unwrap(),
            &FieldValue::ScalarList(vec![Value::from("drone"), Value::from("live")])
        );
    }

    #[test]
    fn single_child_slot() {
        let mut pool = project();
        let root = pool.root();
        let a = pool.create(NodeClass::Metadata, &NodeArgs::new()).unwrap();
        let b = pool.create(NodeClass::Metadata, &NodeArgs::new()).unwrap();
        pool.attach_child(root, "metadata", a, None).unwrap();
        assert!(matches!(
            pool.attach_child(root, "metadata", b, None),
            Err(PoolError::OwnershipViolation { .. })
        ));
        pool.detach(a).unwrap();
        pool.attach_child(root, "metadata", b, None).unwrap();
        pool.delete(a).unwrap();
        pool.check_integrity().unwrap();
        assert_eq!(pool.get(b).unwrap().parent().unwrap().index, None);
    }
}
