//! Commit observers.
//!
//! An observer is registered on one [`Pool`](crate::Pool) and hears about
//! committed batches only. Events of a command that is still running, or
//! that failed and was rolled back, never reach it.

use crate::mutation::Mutation;

/// Receives each committed batch, in commit order.
pub trait PoolObserver: Send {
    fn on_commit(&mut self, events: &[Mutation]);
}

impl<F> PoolObserver for F
where
    F: FnMut(&[Mutation]) + Send,
{
    fn on_commit(&mut self, events: &[Mutation]) {
        self(events)
    }
}
