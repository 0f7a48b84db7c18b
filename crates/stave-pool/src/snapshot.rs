//! Whole-pool snapshots, remapped clones, and event bootstrap.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use stave_types::NodeId;
use tracing::debug;

use crate::error::{PoolError, PoolResult};
use crate::field::FieldValue;
use crate::mutation::Mutation;
use crate::node::{NodeRecord, ObjectNode, ParentLink};
use crate::pool::Pool;

/// Current snapshot encoding version.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Self-contained image of a pool's tree.
///
/// Records are in pre-order from the root: owned children follow their
/// owner, in declared field order and then list order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: u32,
    pub root: NodeId,
    pub nodes: Vec<NodeRecord>,
}

/// A weak reference in a cloned subtree that points outside of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalRef {
    /// Holder in the clone.
    pub holder: NodeId,
    pub field: String,
    /// Original target, left unchanged.
    pub target: NodeId,
}

/// Result of [`Pool::clone_subtree`].
#[derive(Clone, Debug)]
pub struct ClonedSubtree {
    /// Root of the copy. Floating until the caller attaches it.
    pub root: NodeId,
    /// Original id to copy id.
    pub ids: HashMap<NodeId, NodeId>,
    pub external_refs: Vec<ExternalRef>,
}

fn remap_value(value: &FieldValue, map: &HashMap<NodeId, NodeId>) -> FieldValue {
    let m = |id: &NodeId| map.get(id).copied().unwrap_or(*id);
    match value {
        FieldValue::Child(c) => FieldValue::Child(c.as_ref().map(m)),
        FieldValue::ChildList(ids) => FieldValue::ChildList(ids.iter().map(m).collect()),
        FieldValue::Ref(r) => FieldValue::Ref(r.as_ref().map(m)),
        FieldValue::RefList(ids) => FieldValue::RefList(ids.iter().map(m).collect()),
        other => other.clone(),
    }
}

impl Pool {
    /// Pre-order image of the tree. Floating nodes are not included.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            format: SNAPSHOT_FORMAT,
            root: self.root,
            nodes: self.iter().map(ObjectNode::record).collect(),
        }
    }

    /// Encode the tree as a self-contained byte blob.
    pub fn serialize(&self) -> PoolResult<Vec<u8>> {
        bincode::serialize(&self.snapshot()).map_err(|e| PoolError::Serialization(e.to_string()))
    }

    /// Decode a blob produced by [`Pool::serialize`].
    pub fn deserialize(bytes: &[u8]) -> PoolResult<Pool> {
        let snapshot: Snapshot = bincode::deserialize(bytes)
            .map_err(|e| PoolError::CorruptSnapshot(e.to_string()))?;
        Self::from_snapshot(snapshot)
    }

    /// Rebuild a pool from a snapshot.
    ///
    /// The first pass indexes every record. The second links owned children
    /// to their owners and checks weak references, since a reference may
    /// name a node that appears later in the stream.
    pub fn from_snapshot(snapshot: Snapshot) -> PoolResult<Pool> {
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(PoolError::CorruptSnapshot(format!(
                "unsupported snapshot format {}",
                snapshot.format
            )));
        }

        let mut nodes: HashMap<NodeId, ObjectNode> = HashMap::with_capacity(snapshot.nodes.len());
        for record in snapshot.nodes {
            record.class.schema().check_fields(&record.fields)?;
            let id = record.id;
            if nodes.insert(id, ObjectNode::from_record(record)).is_some() {
                return Err(PoolError::CorruptSnapshot(format!("duplicate node {id}")));
            }
        }
        if !nodes.contains_key(&snapshot.root) {
            return Err(PoolError::CorruptSnapshot(format!(
                "root {} is missing",
                snapshot.root
            )));
        }

        let mut links: Vec<(NodeId, ParentLink)> = Vec::new();
        for node in nodes.values() {
            for (idx, value) in node.fields.iter().enumerate() {
                let index_of = |pos: usize| match value {
                    FieldValue::ChildList(_) => Some(pos),
                    _ => None,
                };
                for (pos, child) in value.owned_children().iter().enumerate() {
                    links.push((
                        *child,
                        ParentLink {
                            owner: node.id,
                            field: idx,
                            index: index_of(pos),
                        },
                    ));
                }
                if let Some(target) = value.references().iter().find(|t| !nodes.contains_key(*t)) {
                    return Err(PoolError::CorruptSnapshot(format!(
                        "{} references missing node {target}",
                        node.id
                    )));
                }
            }
        }

        for (child, link) in links {
            let owner_class = nodes.get(&link.owner).map(|n| n.class);
            let expected = owner_class
                .and_then(|c| c.schema().fields.get(link.field))
                .and_then(|spec| spec.kind.child_class());
            let node = nodes.get_mut(&child).ok_or_else(|| {
                PoolError::CorruptSnapshot(format!("{} owns missing node {child}", link.owner))
            })?;
            if node.parent.is_some() || child == snapshot.root {
                return Err(PoolError::CorruptSnapshot(format!(
                    "node {child} has more than one owner"
                )));
            }
            if expected != Some(node.class) {
                return Err(PoolError::CorruptSnapshot(format!(
                    "node {child} is a {} in a field expecting {:?}",
                    node.class, expected
                )));
            }
            node.parent = Some(link);
        }

        let pool = Pool::from_parts(snapshot.root, nodes);
        let reachable = pool.subtree_ids(pool.root).len();
        if reachable != pool.len() {
            return Err(PoolError::CorruptSnapshot(format!(
                "{} of {} nodes are unreachable from the root",
                pool.len() - reachable,
                pool.len()
            )));
        }
        debug!(nodes = pool.len(), root = %pool.root, "loaded snapshot");
        Ok(pool)
    }

    /// Deep copy in which every node gets a fresh id.
    ///
    /// Owned and weak references are rewritten consistently.
    pub fn clone_with_remap(&self) -> PoolResult<Pool> {
        let snapshot = self.snapshot();
        let mut map = HashMap::with_capacity(snapshot.nodes.len());
        let mut used: HashSet<NodeId> = HashSet::with_capacity(snapshot.nodes.len());
        for record in &snapshot.nodes {
            let fresh = loop {
                let id = NodeId::random();
                if !self.contains(id) && used.insert(id) {
                    break id;
                }
            };
            map.insert(record.id, fresh);
        }
        let nodes = snapshot
            .nodes
            .iter()
            .map(|r| NodeRecord {
                id: map[&r.id],
                class: r.class,
                fields: r.fields.iter().map(|v| remap_value(v, &map)).collect(),
            })
            .collect();
        Self::from_snapshot(Snapshot {
            format: SNAPSHOT_FORMAT,
            root: map[&snapshot.root],
            nodes,
        })
    }

    /// Copy the subtree under `top` inside this pool with fresh ids.
    ///
    /// The copy is added and linked through ordinary events, and its root is
    /// left floating. Weak references that point outside the subtree keep
    /// their original targets and are reported for the caller to reject or
    /// rebind.
    pub fn clone_subtree(&mut self, top: NodeId) -> PoolResult<ClonedSubtree> {
        let originals = self.subtree_ids(top);
        if originals.is_empty() {
            return Err(PoolError::UnknownId(top));
        }
        let inside: HashSet<NodeId> = originals.iter().copied().collect();
        let mut ids = HashMap::with_capacity(originals.len());
        for id in &originals {
            let fresh = self.mint_id()?;
            ids.insert(*id, fresh);
        }

        let records: Vec<NodeRecord> = originals
            .iter()
            .map(|id| self.get(*id).map(ObjectNode::record))
            .collect::<PoolResult<_>>()?;

        let mut external_refs = Vec::new();
        for record in &records {
            let holder = ids[&record.id];
            let schema = record.class.schema();
            let fields = record
                .fields
                .iter()
                .zip(schema.fields)
                .map(|(value, spec)| {
                    for target in value.references() {
                        if !inside.contains(target) {
                            external_refs.push(ExternalRef {
                                holder,
                                field: spec.name.to_string(),
                                target: *target,
                            });
                        }
                    }
                    match spec.kind.empty_value() {
                        Some(empty) if spec.kind.owns_children() => empty,
                        _ => remap_value(value, &ids),
                    }
                })
                .collect();
            self.emit(Mutation::ObjectAdded {
                node: NodeRecord {
                    id: holder,
                    class: record.class,
                    fields,
                },
            })?;
        }

        for record in &records {
            let owner = ids[&record.id];
            for (value, spec) in record.fields.iter().zip(record.class.schema().fields) {
                for child in value.owned_children() {
                    self.attach_child(owner, spec.name, ids[child], None)?;
                }
            }
        }

        debug!(top = %top, copies = ids.len(), external = external_refs.len(), "cloned subtree");
        Ok(ClonedSubtree {
            root: ids[&top],
            ids,
            external_refs,
        })
    }

    /// One `ObjectAdded` per node in tree order, for bootstrapping a replica.
    pub fn snapshot_as_events(&self) -> Vec<Mutation> {
        self.snapshot()
            .nodes
            .into_iter()
            .map(|node| Mutation::ObjectAdded { node })
            .collect()
    }

    /// Rebuild a pool from a bootstrap stream produced by
    /// [`Pool::snapshot_as_events`]. The first event names the root.
    pub fn from_events(events: impl IntoIterator<Item = Mutation>) -> PoolResult<Pool> {
        let mut nodes = Vec::new();
        for event in events {
            match event {
                Mutation::ObjectAdded { node } => nodes.push(node),
                other => {
                    return Err(PoolError::CorruptSnapshot(format!(
                        "bootstrap stream contains {}",
                        other.kind()
                    )))
                }
            }
        }
        let root = nodes
            .first()
            .map(|n| n.id)
            .ok_or_else(|| PoolError::CorruptSnapshot("empty bootstrap stream".into()))?;
        Self::from_snapshot(Snapshot {
            format: SNAPSHOT_FORMAT,
            root,
            nodes,
        })
    }
}

/// Returns `true` if two pools hold the same tree up to node identity.
///
/// Ids are compared by the pre-order position of the node they name.
pub fn same_structure(a: &Pool, b: &Pool) -> bool {
    fn positional(snapshot: &Snapshot) -> HashMap<NodeId, NodeId> {
        snapshot
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, r)| NodeId::from_raw(i as u64 + 1).ok().map(|p| (r.id, p)))
            .collect()
    }
    let (sa, sb) = (a.snapshot(), b.snapshot());
    let (pa, pb) = (positional(&sa), positional(&sb));
    sa.nodes.len() == sb.nodes.len()
        && sa.nodes.iter().zip(&sb.nodes).all(|(ra, rb)| {
            ra.class == rb.class
                && ra
                    .fields
                    .iter()
                    .zip(&rb.fields)
                    .all(|(va, vb)| remap_value(va, &pa) == remap_value(vb, &pb))
        })
}
