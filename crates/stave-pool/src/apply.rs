//! Event application.
//!
//! [`Pool::apply_raw`] is the single place where pool state changes. Each
//! arm validates the event against the current state first and only then
//! mutates, so a rejected event leaves the pool untouched.

use stave_types::NodeId;

use crate::class::NodeClass;
use crate::error::{PoolError, PoolResult};
use crate::field::{Element, FieldValue};
use crate::mutation::Mutation;
use crate::node::{NodeRecord, ObjectNode, ParentLink};
use crate::pool::Pool;
use crate::schema::FieldKind;

fn stale(id: NodeId, field: &str, reason: impl Into<String>) -> PoolError {
    PoolError::StaleEvent {
        id,
        field: field.to_string(),
        reason: reason.into(),
    }
}

impl Pool {
    pub(crate) fn apply_raw(&mut self, event: &Mutation) -> PoolResult<()> {
        match event {
            Mutation::ObjectAdded { node } => self.apply_added(node),
            Mutation::ObjectRemoved { node } => self.apply_removed(node),
            Mutation::PropertyValueChange { id, field, old, new } => {
                self.apply_value_change(*id, field, old, new)
            }
            Mutation::PropertyListInsert {
                id,
                field,
                index,
                value,
            } => self.apply_list_insert(*id, field, *index, value),
            Mutation::PropertyListDelete {
                id,
                field,
                index,
                old,
            } => self.apply_list_delete(*id, field, *index, old),
            Mutation::PropertyListReplace {
                id,
                field,
                index,
                old,
                new,
            } => self.apply_list_replace(*id, field, *index, old, new),
        }
    }

    fn apply_added(&mut self, record: &NodeRecord) -> PoolResult<()> {
        if self.nodes.contains_key(&record.id) {
            return Err(PoolError::DuplicateId(record.id));
        }
        let schema = record.class.schema();
        schema.check_fields(&record.fields)?;
        if let Some(spec) = schema
            .fields
            .iter()
            .zip(&record.fields)
            .find(|(_, v)| !v.owned_children().is_empty())
            .map(|(spec, _)| spec)
        {
            return Err(stale(
                record.id,
                spec.name,
                "added node already owns children",
            ));
        }

        let node = ObjectNode::from_record(record.clone());
        let refs: Vec<(usize, NodeId)> = node.references().collect();
        self.nodes.insert(record.id, node);
        self.floating.insert(record.id);
        self.dangling.remove(&record.id);
        for (idx, target) in refs {
            self.add_backref(target, record.id, idx);
        }
        Ok(())
    }

    fn apply_removed(&mut self, record: &NodeRecord) -> PoolResult<()> {
        let node = self.get(record.id)?;
        if record.id == self.root {
            return Err(PoolError::ownership(record.id, "the root cannot be removed"));
        }
        if node.parent.is_some() {
            return Err(PoolError::ownership(record.id, "node is still attached"));
        }
        if node.has_children() {
            return Err(PoolError::ownership(
                record.id,
                "node still owns children",
            ));
        }
        if node.class != record.class || node.fields.as_slice() != record.fields.as_slice() {
            return Err(stale(record.id, "*", "removed record differs from pool"));
        }

        let refs: Vec<(usize, NodeId)> = node.references().collect();
        for (idx, target) in refs {
            self.remove_backref(target, record.id, idx);
        }
        self.nodes.remove(&record.id);
        self.floating.remove(&record.id);
        if self.backrefs.contains_key(&record.id) {
            self.dangling.insert(record.id);
        }
        Ok(())
    }

    /// Check that `child` can be owned by `owner` through a field of `class`.
    fn check_adoptable(
        &self,
        owner: NodeId,
        field: &str,
        child: NodeId,
        class: NodeClass,
    ) -> PoolResult<()> {
        let node = self.get(child)?;
        if child == self.root {
            return Err(PoolError::ownership(child, "the root cannot be owned"));
        }
        if let Some(link) = node.parent {
            return Err(PoolError::ownership(
                child,
                format!("already owned by {}", link.owner),
            ));
        }
        if node.class != class {
            return Err(PoolError::schema(
                self.get(owner)?.class,
                field,
                format!("expected a {class}, found a {}", node.class),
            ));
        }
        if self.is_self_or_ancestor(child, owner) {
            return Err(PoolError::ownership(
                child,
                format!("attaching under {owner} would create a cycle"),
            ));
        }
        Ok(())
    }

    fn apply_value_change(
        &mut self,
        id: NodeId,
        field: &str,
        old: &FieldValue,
        new: &FieldValue,
    ) -> PoolResult<()> {
        let (idx, spec) = self.slot(id, field)?;
        let class = self.get(id)?.class;
        if spec.kind.is_list() {
            return Err(PoolError::schema(class, field, "list fields change per index"));
        }
        new.conforms_to(&spec.kind)
            .map_err(|reason| PoolError::schema(class, field, reason))?;
        if self.value_at(id, idx)? != old {
            return Err(stale(id, field, format!("expected old value {old}")));
        }
        if old == new {
            return Ok(());
        }

        match spec.kind {
            FieldKind::Child(child_class) => {
                if let FieldValue::Child(Some(child)) = new {
                    self.check_adoptable(id, field, *child, child_class)?;
                }
                if let FieldValue::Child(Some(prev)) = old {
                    self.set_parent(*prev, None)?;
                }
                if let FieldValue::Child(Some(child)) = new {
                    let link = ParentLink {
                        owner: id,
                        field: idx,
                        index: None,
                    };
                    self.set_parent(*child, Some(link))?;
                }
            }
            FieldKind::Ref => {
                if let FieldValue::Ref(Some(prev)) = old {
                    self.remove_backref(*prev, id, idx);
                }
                if let FieldValue::Ref(Some(target)) = new {
                    self.add_backref(*target, id, idx);
                }
            }
            _ => {}
        }
        *self.value_at_mut(id, idx)? = new.clone();
        Ok(())
    }

    /// Rewrite the parent links of owned children from `from` onwards.
    fn renumber(&mut self, owner: NodeId, idx: usize, from: usize) -> PoolResult<()> {
        let children = match self.value_at(owner, idx)? {
            FieldValue::ChildList(ids) => ids.get(from..).unwrap_or(&[]).to_vec(),
            _ => return Ok(()),
        };
        for (offset, child) in children.into_iter().enumerate() {
            let link = ParentLink {
                owner,
                field: idx,
                index: Some(from + offset),
            };
            self.set_parent(child, Some(link))?;
        }
        Ok(())
    }

    fn list_bounds(
        &self,
        id: NodeId,
        field: &str,
        idx: usize,
        index: usize,
        inclusive: bool,
    ) -> PoolResult<usize> {
        let len = self.value_at(id, idx)?.list_len().unwrap_or(0);
        let ok = if inclusive { index <= len } else { index < len };
        if !ok {
            return Err(PoolError::IndexOutOfBounds {
                id,
                field: field.to_string(),
                index,
                len,
            });
        }
        Ok(len)
    }

    fn apply_list_insert(
        &mut self,
        id: NodeId,
        field: &str,
        index: usize,
        value: &Element,
    ) -> PoolResult<()> {
        let (idx, spec) = self.slot(id, field)?;
        let class = self.get(id)?.class;
        if !spec.kind.is_list() {
            return Err(PoolError::schema(class, field, "not a list field"));
        }
        self.list_bounds(id, field, idx, index, true)?;

        match (spec.kind, value) {
            (FieldKind::ScalarList(t), Element::Value(v)) if v.scalar_type() == t => {
                if let FieldValue::ScalarList(items) = self.value_at_mut(id, idx)? {
                    items.insert(index, v.clone());
                }
            }
            (FieldKind::RefList, Element::Node(target)) => {
                if let FieldValue::RefList(items) = self.value_at_mut(id, idx)? {
                    items.insert(index, *target);
                }
                self.add_backref(*target, id, idx);
            }
            (FieldKind::ChildList(child_class), Element::Node(child)) => {
                self.check_adoptable(id, field, *child, child_class)?;
                if let FieldValue::ChildList(items) = self.value_at_mut(id, idx)? {
                    items.insert(index, *child);
                }
                self.renumber(id, idx, index)?;
            }
            (kind, value) => {
                return Err(PoolError::schema(
                    class,
                    field,
                    format!("cannot insert {value} into {kind}"),
                ))
            }
        }
        Ok(())
    }

    fn apply_list_delete(
        &mut self,
        id: NodeId,
        field: &str,
        index: usize,
        old: &Element,
    ) -> PoolResult<()> {
        let (idx, spec) = self.slot(id, field)?;
        let class = self.get(id)?.class;
        if !spec.kind.is_list() {
            return Err(PoolError::schema(class, field, "not a list field"));
        }
        self.list_bounds(id, field, idx, index, false)?;
        if self.value_at(id, idx)?.element(index).as_ref() != Some(old) {
            return Err(stale(id, field, format!("expected {old} at index {index}")));
        }

        match self.value_at_mut(id, idx)? {
            FieldValue::ScalarList(items) => {
                items.remove(index);
            }
            FieldValue::RefList(items) => {
                let target = items.remove(index);
                self.remove_backref(target, id, idx);
            }
            FieldValue::ChildList(items) => {
                let child = items.remove(index);
                self.set_parent(child, None)?;
                self.renumber(id, idx, index)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_list_replace(
        &mut self,
        id: NodeId,
        field: &str,
        index: usize,
        old: &Element,
        new: &Element,
    ) -> PoolResult<()> {
        let (idx, spec) = self.slot(id, field)?;
        let class = self.get(id)?.class;
        match spec.kind {
            FieldKind::ScalarList(t) => match new {
                Element::Value(v) if v.scalar_type() == t => {}
                _ => {
                    return Err(PoolError::schema(
                        class,
                        field,
                        format!("expected {t}, found {new}"),
                    ))
                }
            },
            FieldKind::RefList => {
                if new.as_node().is_none() {
                    return Err(PoolError::schema(class, field, "expected a node id"));
                }
            }
            FieldKind::ChildList(_) => {
                return Err(PoolError::schema(
                    class,
                    field,
                    "owned children are replaced by delete and insert",
                ))
            }
            _ => return Err(PoolError::schema(class, field, "not a list field")),
        }
        self.list_bounds(id, field, idx, index, false)?;
        if self.value_at(id, idx)?.element(index).as_ref() != Some(old) {
            return Err(stale(id, field, format!("expected {old} at index {index}")));
        }

        match (self.value_at_mut(id, idx)?, new) {
            (FieldValue::ScalarList(items), Element::Value(v)) => items[index] = v.clone(),
            (FieldValue::RefList(items), Element::Node(target)) => {
                let prev = std::mem::replace(&mut items[index], *target);
                self.remove_backref(prev, id, idx);
                self.add_backref(*target, id, idx);
            }
            _ => {}
        }
        Ok(())
    }
}
