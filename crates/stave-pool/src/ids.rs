use std::collections::VecDeque;

use stave_types::NodeId;

use crate::error::{PoolError, PoolResult};

/// Hands out node identities and remembers what it handed out.
///
/// Live edits draw random ids. Replay presets the exact ids recorded when
/// the command first ran so that recovery reproduces identical identities.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    preset: VecDeque<NodeId>,
    minted: Vec<NodeId>,
}

impl IdAllocator {
    pub(crate) fn next(&mut self, in_use: impl Fn(NodeId) -> bool) -> PoolResult<NodeId> {
        let id = match self.preset.pop_front() {
            Some(id) if in_use(id) => return Err(PoolError::DuplicateId(id)),
            Some(id) => id,
            None => loop {
                let id = NodeId::random();
                if !in_use(id) {
                    break id;
                }
            },
        };
        self.minted.push(id);
        Ok(id)
    }

    pub(crate) fn preset(&mut self, ids: Vec<NodeId>) {
        self.preset = ids.into();
    }

    pub(crate) fn take_minted(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.minted)
    }

    pub(crate) fn take_preset(&mut self) -> Vec<NodeId> {
        self.preset.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_ids_are_used_in_order() {
        let a = NodeId::from_raw(7).unwrap();
        let b = NodeId::from_raw(9).unwrap();
        let mut ids = IdAllocator::default();
        ids.preset(vec![a, b]);
        assert_eq!(ids.next(|_| false).unwrap(), a);
        assert_eq!(ids.next(|_| false).unwrap(), b);
        assert_eq!(ids.take_minted(), vec![a, b]);
        assert!(ids.take_minted().is_empty());
    }

    #[test]
    fn preset_collision_is_an_error() {
        let a = NodeId::from_raw(7).unwrap();
        let mut ids = IdAllocator::default();
        ids.preset(vec![a]);
        assert_eq!(ids.next(|id| id == a), Err(PoolError::DuplicateId(a)));
    }

    #[test]
    fn leftover_preset_is_reported() {
        let mut ids = IdAllocator::default();
        ids.preset(vec![NodeId::from_raw(1).unwrap()]);
        assert_eq!(ids.take_preset().len(), 1);
        assert!(ids.take_preset().is_empty());
    }
}
