use std::collections::{HashMap, HashSet};

use stave_types::NodeId;

use crate::error::{PoolError, PoolResult};
use crate::field::FieldValue;
use crate::node::ParentLink;
use crate::pool::Pool;

impl Pool {
    /// Full consistency check of the tree and its indexes.
    ///
    /// Verifies that every node is reached from the root exactly once, that
    /// parent links match the owning fields with contiguous list indices,
    /// that nothing is floating, and that no weak reference dangles.
    pub fn check_integrity(&self) -> PoolResult<()> {
        let root = self.get(self.root)?;
        if root.parent.is_some() {
            return Err(PoolError::ownership(self.root, "the root has an owner"));
        }

        let mut seen: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(PoolError::ownership(id, "reached twice from the root"));
            }
            let node = self.get(id)?;
            node.class.schema().check_fields(node.fields.as_slice())?;
            for (idx, value) in node.fields.iter().enumerate() {
                for (pos, child) in value.owned_children().iter().enumerate() {
                    let expected = ParentLink {
                        owner: id,
                        field: idx,
                        index: matches!(value, FieldValue::ChildList(_)).then_some(pos),
                    };
                    let actual = self.get(*child)?.parent;
                    if actual != Some(expected) {
                        return Err(PoolError::ownership(
                            *child,
                            format!("parent link {actual:?} does not match {expected:?}"),
                        ));
                    }
                    stack.push(*child);
                }
            }
        }

        if seen.len() != self.nodes.len() {
            return Err(PoolError::ownership(
                self.root,
                format!(
                    "{} node(s) are not reachable from the root",
                    self.nodes.len() - seen.len()
                ),
            ));
        }
        if let Some(id) = self.floating.iter().next() {
            return Err(PoolError::ownership(*id, "node is floating"));
        }
        if let Some(d) = self.dangling_references().into_iter().next() {
            return Err(PoolError::DanglingReference {
                holder: d.holder,
                field: d.field,
                target: d.target,
            });
        }

        let mut counted: HashMap<NodeId, usize> = HashMap::new();
        for node in self.nodes.values() {
            for (_, target) in node.references() {
                *counted.entry(target).or_default() += 1;
            }
        }
        let indexed: HashMap<NodeId, usize> = self
            .backrefs
            .iter()
            .map(|(target, holders)| (*target, holders.len()))
            .collect();
        if counted != indexed {
            return Err(PoolError::Inconsistent(
                "reference index disagrees with node fields".into(),
            ));
        }
        Ok(())
    }
}
