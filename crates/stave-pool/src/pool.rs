use std::collections::{BTreeSet, HashMap};
use std::fmt;

use stave_types::NodeId;
use tracing::{debug, warn};

use crate::class::NodeClass;
use crate::error::{PoolError, PoolResult};
use crate::field::{FieldValue, NodeArgs};
use crate::ids::IdAllocator;
use crate::mutation::Mutation;
use crate::node::{ObjectNode, ParentLink};
use crate::observer::PoolObserver;
use crate::schema::FieldSpec;

/// Position in the pool's event journal, taken before a batch of edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct JournalMark(usize);

/// A weak reference whose target is no longer in the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DanglingRef {
    pub holder: NodeId,
    pub field: String,
    pub target: NodeId,
}

/// In-memory authority over every node of one document.
///
/// The pool owns all nodes, keyed by id, under exactly one root. It is the
/// only component that creates, deletes, attaches, or detaches nodes, and
/// it reports every such change as a [`Mutation`] appended to the journal.
/// Registered [`PoolObserver`]s only see batches passed to [`Pool::publish`]
/// once their command has committed.
///
/// Between commands the pool is a single consistent tree. Inside a command,
/// nodes that were created or detached but not yet attached are *floating*;
/// the command layer refuses to commit while any remain.
pub struct Pool {
    pub(crate) root: NodeId,
    pub(crate) nodes: HashMap<NodeId, ObjectNode>,
    pub(crate) floating: BTreeSet<NodeId>,
    /// target -> (holder, field index), one entry per reference.
    pub(crate) backrefs: HashMap<NodeId, Vec<(NodeId, usize)>>,
    /// Targets that are referenced but absent.
    pub(crate) dangling: BTreeSet<NodeId>,
    pub(crate) ids: IdAllocator,
    journal: Vec<Mutation>,
    observers: Vec<Box<dyn PoolObserver>>,
}

impl Pool {
    /// Create a pool holding a single root node.
    pub fn new(class: NodeClass, args: &NodeArgs) -> PoolResult<Self> {
        let fields = class.schema().build(args)?;
        let id = NodeId::random();
        let root = ObjectNode {
            id,
            class,
            fields,
            parent: None,
        };
        if let Some((idx, target)) = root.references().next() {
            return Err(PoolError::DanglingReference {
                holder: id,
                field: class.schema().fields[idx].name.to_string(),
                target,
            });
        }
        let mut nodes = HashMap::new();
        nodes.insert(id, root);
        debug!(root = %id, %class, "created pool");
        Ok(Self::from_parts(id, nodes))
    }

    pub(crate) fn from_parts(root: NodeId, nodes: HashMap<NodeId, ObjectNode>) -> Self {
        let mut pool = Self {
            root,
            nodes,
            floating: BTreeSet::new(),
            backrefs: HashMap::new(),
            dangling: BTreeSet::new(),
            ids: IdAllocator::default(),
            journal: Vec::new(),
            observers: Vec::new(),
        };
        let refs: Vec<(NodeId, usize, NodeId)> = pool
            .nodes
            .values()
            .flat_map(|n| n.references().map(move |(idx, t)| (n.id, idx, t)))
            .collect();
        for (holder, idx, target) in refs {
            pool.add_backref(target, holder, idx);
        }
        pool
    }

    /// Register an observer, builder style.
    pub fn with_observer(mut self, observer: impl PoolObserver + 'static) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn add_observer(&mut self, observer: impl PoolObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> PoolResult<&ObjectNode> {
        self.nodes.get(&id).ok_or(PoolError::UnknownId(id))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> PoolResult<&mut ObjectNode> {
        self.nodes.get_mut(&id).ok_or(PoolError::UnknownId(id))
    }

    /// Field value of a node by name.
    pub fn field(&self, id: NodeId, name: &str) -> PoolResult<&FieldValue> {
        let (idx, _) = self.slot(id, name)?;
        self.value_at(id, idx)
    }

    /// Length of a list field.
    pub fn list_len(&self, id: NodeId, name: &str) -> PoolResult<usize> {
        let node = self.get(id)?;
        self.field(id, name)?
            .list_len()
            .ok_or_else(|| PoolError::schema(node.class, name, "not a list field"))
    }

    /// Nodes reachable from the root, in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectNode> {
        self.subtree_ids(self.root)
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
    }

    /// Ids of `top` and everything it owns, in pre-order.
    pub fn subtree_ids(&self, top: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            out.push(id);
            let children: Vec<NodeId> = node.children().collect();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Owners of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(link) = cur {
            if out.contains(&link.owner) {
                break;
            }
            out.push(link.owner);
            cur = self.nodes.get(&link.owner).and_then(|n| n.parent);
        }
        out
    }

    /// Returns `true` if `candidate` is `id` or one of its owners.
    pub(crate) fn is_self_or_ancestor(&self, candidate: NodeId, id: NodeId) -> bool {
        candidate == id || self.ancestors(id).contains(&candidate)
    }

    /// Nodes created or detached and not yet attached.
    pub fn floating(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.floating.iter().copied()
    }

    pub fn is_floating(&self, id: NodeId) -> bool {
        self.floating.contains(&id)
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// Holders referencing `target`, with the referencing field name.
    pub fn references_to(&self, target: NodeId) -> Vec<(NodeId, String)> {
        self.backrefs
            .get(&target)
            .into_iter()
            .flatten()
            .map(|&(holder, idx)| (holder, self.field_name(holder, idx)))
            .collect()
    }

    /// Every weak reference whose target is gone.
    pub fn dangling_references(&self) -> Vec<DanglingRef> {
        self.dangling
            .iter()
            .flat_map(|&target| {
                self.references_to(target)
                    .into_iter()
                    .map(move |(holder, field)| DanglingRef {
                        holder,
                        field,
                        target,
                    })
            })
            .collect()
    }

    /// Resolve a single-reference field.
    pub fn resolve(&self, id: NodeId, name: &str) -> PoolResult<Option<&ObjectNode>> {
        match self.field(id, name)? {
            FieldValue::Ref(None) => Ok(None),
            FieldValue::Ref(Some(target)) => self.resolve_target(id, name, *target).map(Some),
            _ => Err(PoolError::schema(self.get(id)?.class, name, "not a reference field")),
        }
    }

    /// Resolve every target of a reference-list field, in order.
    pub fn resolve_list(&self, id: NodeId, name: &str) -> PoolResult<Vec<&ObjectNode>> {
        match self.field(id, name)? {
            FieldValue::RefList(targets) => targets
                .iter()
                .map(|t| self.resolve_target(id, name, *t))
                .collect(),
            _ => Err(PoolError::schema(
                self.get(id)?.class,
                name,
                "not a reference list field",
            )),
        }
    }

    fn resolve_target(&self, holder: NodeId, name: &str, target: NodeId) -> PoolResult<&ObjectNode> {
        self.nodes
            .get(&target)
            .ok_or_else(|| PoolError::DanglingReference {
                holder,
                field: name.to_string(),
                target,
            })
    }

    pub(crate) fn add_backref(&mut self, target: NodeId, holder: NodeId, idx: usize) {
        self.backrefs.entry(target).or_default().push((holder, idx));
        if !self.nodes.contains_key(&target) {
            self.dangling.insert(target);
        }
    }

    pub(crate) fn remove_backref(&mut self, target: NodeId, holder: NodeId, idx: usize) {
        if let Some(holders) = self.backrefs.get_mut(&target) {
            if let Some(pos) = holders.iter().position(|&h| h == (holder, idx)) {
                holders.swap_remove(pos);
            }
            if holders.is_empty() {
                self.backrefs.remove(&target);
                self.dangling.remove(&target);
            }
        }
    }

    // ------------------------------------------------------------------
    // Schema helpers
    // ------------------------------------------------------------------

    /// Resolve a field name on a node to its index and spec.
    pub(crate) fn slot(&self, id: NodeId, name: &str) -> PoolResult<(usize, &'static FieldSpec)> {
        let class = self.get(id)?.class;
        class
            .schema()
            .field(name)
            .ok_or_else(|| PoolError::UnknownField {
                class,
                field: name.to_string(),
            })
    }

    pub(crate) fn value_at(&self, id: NodeId, idx: usize) -> PoolResult<&FieldValue> {
        let node = self.get(id)?;
        node.fields.get(idx).ok_or_else(|| PoolError::UnknownField {
            class: node.class,
            field: format!("#{idx}"),
        })
    }

    pub(crate) fn value_at_mut(&mut self, id: NodeId, idx: usize) -> PoolResult<&mut FieldValue> {
        let node = self.get_mut(id)?;
        let class = node.class;
        node.fields
            .get_mut(idx)
            .ok_or_else(|| PoolError::UnknownField {
                class,
                field: format!("#{idx}"),
            })
    }

    pub(crate) fn field_name(&self, id: NodeId, idx: usize) -> String {
        self.nodes
            .get(&id)
            .and_then(|n| n.class.schema().fields.get(idx))
            .map(|spec| spec.name.to_string())
            .unwrap_or_else(|| format!("#{idx}"))
    }

    pub(crate) fn set_parent(&mut self, child: NodeId, link: Option<ParentLink>) -> PoolResult<()> {
        self.get_mut(child)?.parent = link;
        match link {
            Some(_) => self.floating.remove(&child),
            None => self.floating.insert(child),
        };
        Ok(())
    }

    pub(crate) fn mint_id(&mut self) -> PoolResult<NodeId> {
        let nodes = &self.nodes;
        self.ids.next(|id| nodes.contains_key(&id))
    }

    // ------------------------------------------------------------------
    // Deterministic identities
    // ------------------------------------------------------------------

    /// Queue the ids the next creations must use, in order.
    pub fn preset_ids(&mut self, ids: Vec<NodeId>) {
        self.ids.preset(ids);
    }

    /// Ids handed out since the last call.
    pub fn take_minted(&mut self) -> Vec<NodeId> {
        self.ids.take_minted()
    }

    /// Preset ids that were never consumed.
    pub fn take_unused_preset(&mut self) -> Vec<NodeId> {
        self.ids.take_preset()
    }

    // ------------------------------------------------------------------
    // Journal
    // ------------------------------------------------------------------

    /// Apply an event and record it. Used by every mutating operation.
    pub(crate) fn emit(&mut self, event: Mutation) -> PoolResult<()> {
        self.apply_raw(&event)?;
        self.record(event);
        Ok(())
    }

    fn record(&mut self, event: Mutation) {
        self.journal.push(event);
    }

    /// Hand a committed batch to every observer. Empty batches are skipped.
    pub fn publish(&mut self, events: &[Mutation]) {
        if events.is_empty() {
            return;
        }
        for observer in &mut self.observers {
            observer.on_commit(events);
        }
    }

    /// Apply an externally produced event, such as a replicated or redone one.
    pub fn apply(&mut self, event: &Mutation) -> PoolResult<()> {
        self.emit(event.clone())
    }

    /// Undo `events` by applying their inverses in reverse order.
    ///
    /// The inverse events are recorded like any other edit.
    pub fn revert(&mut self, events: &[Mutation]) -> PoolResult<()> {
        for event in events.iter().rev() {
            self.emit(event.inverse())?;
        }
        Ok(())
    }

    pub fn journal_mark(&self) -> JournalMark {
        JournalMark(self.journal.len())
    }

    /// Events recorded since the mark.
    pub fn journal_since(&self, mark: JournalMark) -> &[Mutation] {
        self.journal.get(mark.0..).unwrap_or(&[])
    }

    /// Drain every recorded event.
    pub fn take_journal(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.journal)
    }

    /// Drain the events recorded after the mark, keeping earlier ones.
    pub fn take_journal_since(&mut self, mark: JournalMark) -> Vec<Mutation> {
        if mark.0 >= self.journal.len() {
            return Vec::new();
        }
        self.journal.split_off(mark.0)
    }

    /// Undo every event recorded after `mark`, newest first.
    ///
    /// Rolled-back events leave the journal and are never published.
    pub fn rollback_to(&mut self, mark: JournalMark) -> PoolResult<()> {
        if mark.0 > self.journal.len() {
            return Ok(());
        }
        let tail = self.journal.split_off(mark.0);
        debug!(events = tail.len(), "rolling back");
        for event in tail.iter().rev() {
            let inverse = event.inverse();
            if let Err(e) = self.apply_raw(&inverse) {
                warn!(error = %e, event = %event, "rollback step failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("floating", &self.floating.len())
            .field("journal", &self.journal.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}
