use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use stave_pool::{Mutation, Pool};

use crate::error::{EngineError, EngineResult};

/// Bounded undo/redo stacks of committed event batches.
///
/// Each entry holds the events one commit emitted. Undo applies their
/// inverses newest first; redo applies them again. A new commit clears the
/// redo stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct History {
    undo: VecDeque<Vec<Mutation>>,
    redo: Vec<Vec<Mutation>>,
    depth: usize,
}

impl History {
    pub fn new(depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            depth,
        }
    }

    /// Change the bound, dropping the oldest entries beyond it.
    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
        self.trim();
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn trim(&mut self) {
        while self.undo.len() > self.depth {
            self.undo.pop_front();
        }
        self.redo.truncate(self.depth);
    }

    /// Push the events of a new commit.
    pub fn record(&mut self, events: Vec<Mutation>) {
        if events.is_empty() {
            return;
        }
        self.redo.clear();
        self.undo.push_back(events);
        self.trim();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Revert the newest commit. Returns the events the pool emitted.
    ///
    /// On failure the pool and both stacks are left as they were.
    pub fn undo(&mut self, pool: &mut Pool) -> EngineResult<Vec<Mutation>> {
        let batch = self.undo.pop_back().ok_or(EngineError::NothingToUndo)?;
        let mark = pool.journal_mark();
        if let Err(e) = pool.revert(&batch) {
            pool.rollback_to(mark)?;
            self.undo.push_back(batch);
            return Err(e.into());
        }
        let events = pool.take_journal_since(mark);
        self.redo.push(batch);
        Ok(events)
    }

    /// Re-apply the newest undone commit. Returns the events the pool emitted.
    pub fn redo(&mut self, pool: &mut Pool) -> EngineResult<Vec<Mutation>> {
        let batch = self.redo.pop().ok_or(EngineError::NothingToRedo)?;
        let mark = pool.journal_mark();
        if let Err(e) = batch.iter().try_for_each(|event| pool.apply(event)) {
            pool.rollback_to(mark)?;
            self.redo.push(batch);
            return Err(e.into());
        }
        let events = pool.take_journal_since(mark);
        self.undo.push_back(batch);
        self.trim();
        Ok(events)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use stave_pool::{NodeArgs, NodeClass};

    use super::*;

    fn project() -> Pool {
        Pool::new(NodeClass::Project, &NodeArgs::new().set("name", "Song")).unwrap()
    }

    fn rename(pool: &mut Pool, name: &str) -> Vec<Mutation> {
        let root = pool.root();
        pool.set(root, "name", name).unwrap();
        pool.take_journal()
    }

    fn name(pool: &Pool) -> String {
        pool.get(pool.root()).unwrap().text("name").unwrap().to_string()
    }

    #[test]
    fn undo_then_redo() {
        let mut pool = project();
        let mut history = History::new(10);
        history.record(rename(&mut pool, "A"));
        history.record(rename(&mut pool, "B"));

        let undone = history.undo(&mut pool).unwrap();
        assert_eq!(undone.len(), 1);
        assert_eq!(name(&pool), "A");
        history.undo(&mut pool).unwrap();
        assert_eq!(name(&pool), "Song");
        assert!(matches!(history.undo(&mut pool), Err(EngineError::NothingToUndo)));

        history.redo(&mut pool).unwrap();
        assert_eq!(name(&pool), "A");
        assert_eq!((history.undo_len(), history.redo_len()), (1, 1));
        assert!(pool.take_journal().is_empty());
    }

    #[test]
    fn new_commit_clears_redo() {
        let mut pool = project();
        let mut history = History::new(10);
        history.record(rename(&mut pool, "A"));
        history.undo(&mut pool).unwrap();
        assert!(history.can_redo());
        history.record(rename(&mut pool, "C"));
        assert!(!history.can_redo());
        assert!(matches!(history.redo(&mut pool), Err(EngineError::NothingToRedo)));
    }

    #[test]
    fn depth_bounds_the_stack() {
        let mut pool = project();
        let mut history = History::new(2);
        for n in ["A", "B", "C"] {
            history.record(rename(&mut pool, n));
        }
        assert_eq!(history.undo_len(), 2);
        history.undo(&mut pool).unwrap();
        history.undo(&mut pool).unwrap();
        assert_eq!(name(&pool), "A");
        assert!(!history.can_undo());

        history.set_depth(0);
        assert_eq!(history.redo_len(), 0);
        history.record(rename(&mut pool, "D"));
        assert!(!history.can_undo());
    }

    #[test]
    fn undo_restores_deleted_subtree() {
        let mut pool = project();
        let root = pool.root();
        let track = pool
            .create(NodeClass::Track, &NodeArgs::new().set("name", "Lead"))
            .unwrap();
        pool.attach_child(root, "tracks", track, None).unwrap();
        let measure = pool.create(NodeClass::Measure, &NodeArgs::new()).unwrap();
        pool.attach_child(track, "measures", measure, None).unwrap();
        pool.take_journal();
        let before = pool.snapshot();

        let mut history = History::new(4);
        pool.delete(track).unwrap();
        history.record(pool.take_journal());
        assert!(!pool.contains(measure));

        history.undo(&mut pool).unwrap();
        assert_eq!(pool.snapshot(), before);
        pool.check_integrity().unwrap();
    }
}
