use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stave_pool::{Mutation, MutationKind};
use stave_types::NodeId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Filter for subscribing to a subset of mutation events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// If set, only events of these kinds are delivered.
    pub kinds: Option<Vec<MutationKind>>,
    /// If set, only events whose target node is listed are delivered.
    pub nodes: Option<Vec<NodeId>>,
}

impl EventFilter {
    /// Everything, in order. The only filter a full replica accepts.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kinds(kinds: impl IntoIterator<Item = MutationKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            nodes: None,
        }
    }

    /// Returns `true` if no event is filtered out.
    pub fn is_complete(&self) -> bool {
        self.kinds.is_none() && self.nodes.is_none()
    }

    /// Returns `true` if the given event matches this filter.
    pub fn matches(&self, event: &Mutation) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(ref nodes) = self.nodes {
            if !nodes.contains(&event.target()) {
                return false;
            }
        }
        true
    }
}

/// The events of one committed command, undo, or redo.
#[derive(Clone, Debug, PartialEq)]
pub struct EventBatch {
    pub commit_seq: u64,
    pub events: Vec<Mutation>,
}

/// A subscriber's end of the stream.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub filter: EventFilter,
    /// Commit sequence the bootstrap reflects.
    pub commit_seq: u64,
    /// One `ObjectAdded` per node, root first.
    pub bootstrap: Vec<Mutation>,
    pub events: mpsc::Receiver<Arc<EventBatch>>,
}

/// Delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubStats {
    pub batches_published: u64,
    pub batches_delivered: u64,
    /// Subscribers dropped because their queue was full.
    pub subscribers_dropped: u64,
    /// Subscribers removed because their receiver was gone.
    pub subscribers_closed: u64,
    pub active_subscribers: usize,
}

/// Lock-free counters shared with readers on other threads.
#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicU64,
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    sender: mpsc::Sender<Arc<EventBatch>>,
}

/// Fan-out of committed events to bounded per-subscriber queues.
///
/// Publishing never blocks the writer: a subscriber whose queue is full is
/// dropped and has to subscribe again to get a fresh bootstrap.
pub struct ReplicationHub {
    subscribers: Vec<Subscriber>,
    capacity: usize,
    next_id: u64,
    counters: Arc<Counters>,
}

impl ReplicationHub {
    /// `capacity` is the number of commit batches queued per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            capacity: capacity.max(1),
            next_id: 1,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register a subscriber, handing it the bootstrap taken at `commit_seq`.
    pub fn subscribe(
        &mut self,
        filter: EventFilter,
        bootstrap: Vec<Mutation>,
        commit_seq: u64,
    ) -> Subscription {
        let (sender, events) = mpsc::channel(self.capacity);
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            filter: filter.clone(),
            sender,
        });
        debug!(subscriber = id, commit_seq, nodes = bootstrap.len(), "subscriber added");
        Subscription {
            id,
            filter,
            commit_seq,
            bootstrap,
            events,
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        before != self.subscribers.len()
    }

    /// Route one commit's events to every matching subscriber.
    ///
    /// Unfiltered subscribers receive every batch, even an empty one, so
    /// they can detect gaps. Returns the number of deliveries.
    pub fn publish(&mut self, commit_seq: u64, events: &[Mutation]) -> usize {
        if self.subscribers.is_empty() {
            return 0;
        }
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let full = Arc::new(EventBatch {
            commit_seq,
            events: events.to_vec(),
        });
        let mut delivered = 0usize;
        let counters = Arc::clone(&self.counters);

        self.subscribers.retain(|sub| {
            let batch = if sub.filter.is_complete() {
                Arc::clone(&full)
            } else {
                let matching: Vec<Mutation> =
                    events.iter().filter(|e| sub.filter.matches(e)).cloned().collect();
                if matching.is_empty() {
                    return !sub.sender.is_closed();
                }
                Arc::new(EventBatch {
                    commit_seq,
                    events: matching,
                })
            };
            match sub.sender.try_send(batch) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(subscriber = sub.id, commit_seq, "subscriber queue full; dropping subscriber");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    counters.closed.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = sub.id, "subscriber gone");
                    false
                }
            }
        });

        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> HubStats {
        HubStats {
            batches_published: self.counters.published.load(Ordering::Relaxed),
            batches_delivered: self.counters.delivered.load(Ordering::Relaxed),
            subscribers_dropped: self.counters.dropped.load(Ordering::Relaxed),
            subscribers_closed: self.counters.closed.load(Ordering::Relaxed),
            active_subscribers: self.subscribers.len(),
        }
    }
}

impl Default for ReplicationHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for ReplicationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationHub")
            .field("subscribers", &self.subscribers.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use stave_pool::{NodeArgs, NodeClass, Pool};

    use super::*;

    fn rename_events(pool: &mut Pool, name: &str) -> Vec<Mutation> {
        let root = pool.root();
        pool.set(root, "name", name).unwrap();
        pool.take_journal()
    }

    #[test]
    fn subscribers_receive_batches_in_order() {
        let mut pool = Pool::new(NodeClass::Project, &NodeArgs::new()).unwrap();
        let mut hub = ReplicationHub::new(8);
        let mut sub = hub.subscribe(EventFilter::all(), pool.snapshot_as_events(), 0);
        assert_eq!(sub.bootstrap.len(), 1);

        for (seq, name) in [(1, "A"), (2, "B")] {
            let events = rename_events(&mut pool, name);
            assert_eq!(hub.publish(seq, &events), 1);
        }
        let first = sub.events.try_recv().unwrap();
        let second = sub.events.try_recv().unwrap();
        assert_eq!((first.commit_seq, second.commit_seq), (1, 2));
        assert_eq!(hub.stats().batches_delivered, 2);
    }

    #[test]
    fn full_queue_drops_subscriber() {
        let mut pool = Pool::new(NodeClass::Project, &NodeArgs::new()).unwrap();
        let mut hub = ReplicationHub::new(1);
        let mut slow = hub.subscribe(EventFilter::all(), vec![], 0);

        let events = rename_events(&mut pool, "A");
        hub.publish(1, &events);
        hub.publish(2, &events);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.stats().subscribers_dropped, 1);

        assert_eq!(slow.events.try_recv().unwrap().commit_seq, 1);
        assert!(matches!(
            slow.events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn closed_receiver_is_pruned() {
        let mut hub = ReplicationHub::new(4);
        let sub = hub.subscribe(EventFilter::all(), vec![], 0);
        drop(sub);
        hub.publish(1, &[]);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.stats().subscribers_closed, 1);
    }

    #[test]
    fn filtered_subscriber_skips_non_matching_batches() {
        let mut pool = Pool::new(NodeClass::Project, &NodeArgs::new()).unwrap();
        let mut hub = ReplicationHub::new(4);
        let mut adds = hub.subscribe(EventFilter::kinds([MutationKind::ObjectAdded]), vec![], 0);
        assert!(!adds.filter.is_complete());

        let events = rename_events(&mut pool, "A");
        assert_eq!(hub.publish(1, &events), 0);
        assert!(adds.events.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 1);

        let track = pool
            .create(NodeClass::Track, &NodeArgs::new().set("name", "T"))
            .unwrap();
        pool.attach_child(pool.root(), "tracks", track, None).unwrap();
        let events = pool.take_journal();
        assert_eq!(hub.publish(2, &events), 1);
        let batch = adds.events.try_recv().unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].kind(), MutationKind::ObjectAdded);
    }

    #[test]
    fn unsubscribe_removes() {
        let mut hub = ReplicationHub::default();
        let sub = hub.subscribe(EventFilter::all(), vec![], 0);
        assert!(hub.unsubscribe(sub.id));
        assert!(!hub.unsubscribe(sub.id));
    }
}
