use std::sync::Arc;

use stave_pool::Pool;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use crate::error::{ReplicaError, ReplicaResult};
use crate::hub::{EventBatch, Subscription};

/// Read-only mirror of a document, fed by one subscription.
///
/// The mirror starts from the subscription's bootstrap and applies every
/// commit batch in order. A batch out of sequence, or one that does not
/// apply, is an error: the replica has to be rebuilt from a new
/// subscription.
pub struct Replica {
    pool: Pool,
    commit_seq: u64,
    events: mpsc::Receiver<Arc<EventBatch>>,
}

impl Replica {
    /// Build the mirror from a subscription's bootstrap.
    pub fn attach(subscription: Subscription) -> ReplicaResult<Self> {
        if !subscription.filter.is_complete() {
            return Err(ReplicaError::PartialStream);
        }
        let pool = Pool::from_events(subscription.bootstrap)?;
        debug!(
            subscriber = subscription.id,
            commit_seq = subscription.commit_seq,
            nodes = pool.len(),
            "replica bootstrapped"
        );
        Ok(Self {
            pool,
            commit_seq: subscription.commit_seq,
            events: subscription.events,
        })
    }

    /// Apply one commit batch.
    pub fn apply(&mut self, batch: &EventBatch) -> ReplicaResult<()> {
        let expected = self.commit_seq + 1;
        if batch.commit_seq != expected {
            return Err(ReplicaError::Gap {
                expected,
                received: batch.commit_seq,
            });
        }
        for event in &batch.events {
            self.pool.apply(event)?;
        }
        self.pool.take_journal();
        self.commit_seq = batch.commit_seq;
        Ok(())
    }

    /// Apply every batch already queued. Returns how many were applied.
    pub fn catch_up(&mut self) -> ReplicaResult<usize> {
        let mut applied = 0;
        loop {
            match self.events.try_recv() {
                Ok(batch) => {
                    self.apply(&batch)?;
                    applied += 1;
                }
                Err(TryRecvError::Empty) => return Ok(applied),
                Err(TryRecvError::Disconnected) => return Err(ReplicaError::Disconnected),
            }
        }
    }

    /// Wait for the next batch and apply it. Returns its commit sequence.
    pub async fn next(&mut self) -> ReplicaResult<u64> {
        let batch = self.events.recv().await.ok_or(ReplicaError::Disconnected)?;
        self.apply(&batch)?;
        Ok(batch.commit_seq)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Commit sequence the mirror reflects.
    pub fn commit_seq(&self) -> u64 {
        self.commit_seq
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("nodes", &self.pool.len())
            .field("commit_seq", &self.commit_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use stave_pool::{same_structure, NodeArgs, NodeClass};

    use super::*;
    use crate::hub::{EventFilter, ReplicationHub};

    fn source() -> Pool {
        let mut pool = Pool::new(NodeClass::Project, &NodeArgs::new().set("name", "Song")).unwrap();
        let track = pool
            .create(NodeClass::Track, &NodeArgs::new().set("name", "Lead"))
            .unwrap();
        pool.attach_child(pool.root(), "tracks", track, None).unwrap();
        pool.take_journal();
        pool
    }

    #[test]
    fn mirror_follows_commits() {
        let mut pool = source();
        let mut hub = ReplicationHub::new(16);
        let sub = hub.subscribe(EventFilter::all(), pool.snapshot_as_events(), 0);
        let mut replica = Replica::attach(sub).unwrap();
        assert!(same_structure(replica.pool(), &pool));

        let track = pool.get(pool.root()).unwrap().children().next().unwrap();
        let measure = pool.create(NodeClass::Measure, &NodeArgs::new()).unwrap();
        pool.attach_child(track, "measures", measure, None).unwrap();
        hub.publish(1, &pool.take_journal());
        pool.set(track, "name", "Bass").unwrap();
        hub.publish(2, &pool.take_journal());

        assert_eq!(replica.catch_up().unwrap(), 2);
        assert_eq!(replica.commit_seq(), 2);
        assert_eq!(replica.pool().snapshot(), pool.snapshot());
    }

    #[test]
    fn gap_is_detected() {
        let pool = source();
        let mut hub = ReplicationHub::new(16);
        let sub = hub.subscribe(EventFilter::all(), pool.snapshot_as_events(), 5);
        let mut replica = Replica::attach(sub).unwrap();
        let err = replica
            .apply(&EventBatch {
                commit_seq: 7,
                events: vec![],
            })
            .unwrap_err();
        assert_eq!(
            err,
            ReplicaError::Gap {
                expected: 6,
                received: 7
            }
        );
    }

    #[test]
    fn filtered_subscription_is_refused() {
        let pool = source();
        let mut hub = ReplicationHub::new(16);
        let sub = hub.subscribe(
            EventFilter::kinds([stave_pool::MutationKind::ObjectAdded]),
            pool.snapshot_as_events(),
            0,
        );
        assert_eq!(Replica::attach(sub).unwrap_err(), ReplicaError::PartialStream);
    }

    #[tokio::test]
    async fn dropped_subscriber_sees_disconnect() {
        let mut pool = source();
        let mut hub = ReplicationHub::new(1);
        let sub = hub.subscribe(EventFilter::all(), pool.snapshot_as_events(), 0);
        let mut replica = Replica::attach(sub).unwrap();

        let root = pool.root();
        pool.set(root, "name", "A").unwrap();
        let first = pool.take_journal();
        pool.set(root, "name", "B").unwrap();
        let second = pool.take_journal();
        hub.publish(1, &first);
        hub.publish(2, &second);

        assert_eq!(replica.next().await.unwrap(), 1);
        assert_eq!(replica.next().await.unwrap_err(), ReplicaError::Disconnected);
        assert_eq!(replica.pool().get(root).unwrap().text("name"), Some("A"));
    }
}
