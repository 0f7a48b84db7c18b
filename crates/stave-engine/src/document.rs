use std::path::Path;

use stave_command::{execute, replay, CommandError, CommandRegistry, CommandRequest, DynCommand};
use stave_journal::{CheckpointHeader, DocumentStore, LogEntry, PendingCheckpoint};
use stave_pool::{Mutation, NodeArgs, NodeClass, Pool, PoolObserver};
use stave_replica::{EventFilter, HubStats, ReplicationHub, Subscription};
use stave_types::{DocumentId, NodeId};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::History;
use crate::image::DocumentImage;

/// Effect of one committed command, undo, or redo.
#[derive(Clone, Debug, PartialEq)]
pub struct Commit {
    /// Commit sequence of the log record.
    pub seq: u64,
    /// Events in emission order, as published to subscribers.
    pub events: Vec<Mutation>,
    /// Node ids the command created.
    pub minted: Vec<NodeId>,
}

/// A checkpoint whose image is captured and whose log is rotated, ready to
/// be written on any thread.
#[derive(Debug)]
pub struct CheckpointJob {
    pending: PendingCheckpoint,
    image: Vec<u8>,
}

impl CheckpointJob {
    pub fn sequence(&self) -> u64 {
        self.pending.sequence()
    }

    pub fn write(self) -> EngineResult<CheckpointHeader> {
        let sequence = self.pending.sequence();
        let header = self.pending.commit(&self.image)?;
        info!(
            sequence,
            commit_seq = header.commit_seq,
            bytes = header.payload_len,
            "checkpoint written"
        );
        Ok(header)
    }
}

/// One open document: the live pool, its durable store, undo history and
/// replication hub.
///
/// A `Document` is a plain single-writer value. Wrap it in a
/// [`DocumentService`](crate::DocumentService) to share it across tasks.
pub struct Document {
    pool: Pool,
    store: Option<DocumentStore>,
    document_id: DocumentId,
    registry: CommandRegistry,
    history: History,
    hub: ReplicationHub,
    config: EngineConfig,
    commit_seq: u64,
    since_checkpoint: u64,
    auto_checkpoint: bool,
}

impl Document {
    /// Create a new document with an untitled project root.
    pub fn create(dir: impl AsRef<Path>, config: EngineConfig) -> EngineResult<Self> {
        Self::create_with(dir, &NodeArgs::new().set("name", "Untitled"), config)
    }

    /// Create a new document whose project root is built from `root`.
    pub fn create_with(
        dir: impl AsRef<Path>,
        root: &NodeArgs,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let mut pool = Pool::new(NodeClass::Project, root)?;
        pool.take_journal();
        pool.take_minted();
        let history = History::new(config.undo_depth);
        let image = DocumentImage::capture(&pool, &history).encode()?;
        let document_id = DocumentId::new();
        let store = DocumentStore::create(dir.as_ref(), document_id, &image, config.store.clone())?;
        Ok(Self::assemble(pool, Some(store), document_id, CommandRegistry::builtin(), history, config, 0))
    }

    /// Open a document, replaying its log with the builtin commands.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> EngineResult<Self> {
        Self::open_with_registry(dir, config, CommandRegistry::builtin())
    }

    /// Open a document whose log may hold commands outside the builtin set.
    ///
    /// Loads the latest checkpoint and replays every later log record with
    /// validation and logging bypassed. Any record that does not reproduce
    /// is [`EngineError::Corrupted`].
    pub fn open_with_registry(
        dir: impl AsRef<Path>,
        config: EngineConfig,
        registry: CommandRegistry,
    ) -> EngineResult<Self> {
        let dir = dir.as_ref();
        let (store, recovery) = DocumentStore::open(dir, config.store.clone())?;
        let base = recovery.checkpoint.header.commit_seq;
        let (mut pool, mut history) = DocumentImage::decode(&recovery.checkpoint.payload)?
            .restore()
            .map_err(|e| EngineError::corrupted(base, e))?;

        // Replay with an unbounded history so every logged undo finds its
        // entry, whatever depth was configured when it was written.
        history.set_depth(usize::MAX);
        for record in &recovery.records {
            replay_entry(&mut pool, &mut history, &registry, &record.entry)
                .map_err(|e| EngineError::corrupted(record.seq, e))?;
        }
        history.set_depth(config.undo_depth);

        let commit_seq = store.last_seq();
        if config.verify_on_open {
            pool.check_integrity()
                .map_err(|e| EngineError::corrupted(commit_seq, e))?;
        }
        if recovery.torn_bytes > 0 {
            warn!(
                dir = %dir.display(),
                torn_bytes = recovery.torn_bytes,
                "truncated an incomplete record at the end of the log"
            );
        }
        info!(
            dir = %dir.display(),
            document = %store.document_id(),
            checkpoint = recovery.checkpoint.header.sequence,
            replayed = recovery.records.len(),
            commit_seq,
            nodes = pool.len(),
            "document opened"
        );
        let document_id = store.document_id();
        let mut doc = Self::assemble(pool, Some(store), document_id, registry, history, config, commit_seq);
        doc.since_checkpoint = recovery.records.len() as u64;
        Ok(doc)
    }

    /// Load the newest valid checkpoint without locking or replaying.
    ///
    /// Commands logged after that checkpoint are not visible. Every edit is
    /// refused with [`EngineError::ReadOnly`].
    pub fn open_read_only(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref();
        let checkpoint = DocumentStore::open_read_only(dir)?;
        let header = checkpoint.header;
        let (pool, history) = DocumentImage::decode(&checkpoint.payload)?
            .restore()
            .map_err(|e| EngineError::corrupted(header.commit_seq, e))?;
        info!(
            dir = %dir.display(),
            checkpoint = header.sequence,
            commit_seq = header.commit_seq,
            "document opened read-only"
        );
        let config = EngineConfig::default();
        Ok(Self::assemble(
            pool,
            None,
            header.document_id,
            CommandRegistry::builtin(),
            history,
            config,
            header.commit_seq,
        ))
    }

    fn assemble(
        pool: Pool,
        store: Option<DocumentStore>,
        document_id: DocumentId,
        registry: CommandRegistry,
        history: History,
        config: EngineConfig,
        commit_seq: u64,
    ) -> Self {
        Self {
            pool,
            store,
            document_id,
            registry,
            history,
            hub: ReplicationHub::new(config.subscriber_capacity),
            config,
            commit_seq,
            since_checkpoint: 0,
            auto_checkpoint: true,
        }
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Validate, run, log, and publish a command.
    ///
    /// A rejected or failed command leaves no trace: no mutation, no log
    /// record, no event.
    pub fn dispatch(&mut self, target: NodeId, command: &dyn DynCommand) -> EngineResult<Commit> {
        let store = self.store.as_mut().ok_or(EngineError::ReadOnly)?;
        let name = command.name();
        if !self.registry.contains(name) {
            return Err(CommandError::UnknownCommand(name.to_string()).into());
        }
        let args = command.encode_args()?;
        let executed = execute(&mut self.pool, target, command)?;

        let entry = LogEntry::Command {
            target,
            command: name.to_string(),
            args,
            minted: executed.minted.clone(),
        };
        let seq = match store.append(entry) {
            Ok(seq) => seq,
            Err(e) => {
                warn!(command = name, %target, error = %e, "log append failed; reverting command");
                self.pool.revert(&executed.events)?;
                self.pool.take_journal();
                return Err(e.into());
            }
        };
        self.history.record(executed.events.clone());
        debug!(seq, command = name, %target, events = executed.events.len(), "command committed");
        Ok(self.committed(seq, executed.events, executed.minted))
    }

    /// Decode a transport request and dispatch it.
    pub fn dispatch_request(&mut self, request: &CommandRequest) -> EngineResult<Commit> {
        let command = self.registry.decode_request(request)?;
        self.dispatch(request.target, command.as_ref())
    }

    /// Revert the newest command still in the history.
    pub fn undo(&mut self) -> EngineResult<Commit> {
        let store = self.store.as_mut().ok_or(EngineError::ReadOnly)?;
        let events = self.history.undo(&mut self.pool)?;
        let seq = match store.append(LogEntry::Undo) {
            Ok(seq) => seq,
            Err(e) => {
                self.history.redo(&mut self.pool)?;
                return Err(e.into());
            }
        };
        debug!(seq, events = events.len(), "undo committed");
        Ok(self.committed(seq, events, Vec::new()))
    }

    /// Re-apply the newest undone command.
    pub fn redo(&mut self) -> EngineResult<Commit> {
        let store = self.store.as_mut().ok_or(EngineError::ReadOnly)?;
        let events = self.history.redo(&mut self.pool)?;
        let seq = match store.append(LogEntry::Redo) {
            Ok(seq) => seq,
            Err(e) => {
                self.history.undo(&mut self.pool)?;
                return Err(e.into());
            }
        };
        debug!(seq, events = events.len(), "redo committed");
        Ok(self.committed(seq, events, Vec::new()))
    }

    fn committed(&mut self, seq: u64, events: Vec<Mutation>, minted: Vec<NodeId>) -> Commit {
        self.commit_seq = seq;
        self.since_checkpoint += 1;
        self.pool.publish(&events);
        self.hub.publish(seq, &events);
        if self.auto_checkpoint && self.checkpoint_due() {
            if let Err(e) = self.checkpoint() {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }
        Commit {
            seq,
            events,
            minted,
        }
    }

    // ------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------

    /// Capture the image and rotate the log. The returned job writes the
    /// checkpoint file and may run on another thread.
    pub fn begin_checkpoint(&mut self) -> EngineResult<CheckpointJob> {
        let store = self.store.as_mut().ok_or(EngineError::ReadOnly)?;
        let image = DocumentImage::capture(&self.pool, &self.history).encode()?;
        let pending = store.begin_checkpoint()?;
        self.since_checkpoint = 0;
        Ok(CheckpointJob { pending, image })
    }

    /// Write a checkpoint synchronously.
    pub fn checkpoint(&mut self) -> EngineResult<CheckpointHeader> {
        self.begin_checkpoint()?.write()
    }

    /// Returns `true` once the configured number of records has been
    /// logged since the last checkpoint.
    pub fn checkpoint_due(&self) -> bool {
        self.store.is_some()
            && matches!(self.config.auto_checkpoint_every, Some(n) if n > 0 && self.since_checkpoint >= n)
    }

    /// Leave automatic checkpoints to the caller.
    pub(crate) fn defer_auto_checkpoint(&mut self) {
        self.auto_checkpoint = false;
    }

    // ------------------------------------------------------------------
    // Replication
    // ------------------------------------------------------------------

    /// Subscribe to committed events, starting from the current tree.
    pub fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        let bootstrap = self.pool.snapshot_as_events();
        self.hub.subscribe(filter, bootstrap, self.commit_seq)
    }

    /// Register an in-process observer of committed batches.
    pub fn add_observer(&mut self, observer: impl PoolObserver + 'static) {
        self.pool.add_observer(observer);
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn hub_stats(&self) -> HubStats {
        self.hub.stats()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn root(&self) -> NodeId {
        self.pool.root()
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Sequence of the last committed record.
    pub fn commit_seq(&self) -> u64 {
        self.commit_seq
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_none()
    }

    /// Directory of a writable document.
    pub fn dir(&self) -> Option<&Path> {
        self.store.as_ref().map(DocumentStore::dir)
    }

    /// Sync the log and release the directory lock.
    pub fn close(self) -> EngineResult<()> {
        if let Some(store) = self.store {
            store.close()?;
        }
        info!(document = %self.document_id, commit_seq = self.commit_seq, "document closed");
        Ok(())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("document_id", &self.document_id)
            .field("commit_seq", &self.commit_seq)
            .field("nodes", &self.pool.len())
            .field("read_only", &self.store.is_none())
            .finish()
    }
}

/// Re-apply one logged entry during recovery.
fn replay_entry(
    pool: &mut Pool,
    history: &mut History,
    registry: &CommandRegistry,
    entry: &LogEntry,
) -> EngineResult<()> {
    match entry {
        LogEntry::Command {
            target,
            command,
            args,
            minted,
        } => {
            let decoded = registry.decode(command, args)?;
            let events = replay(pool, *target, decoded.as_ref(), minted.clone())?;
            history.record(events);
        }
        LogEntry::Undo => {
            history.undo(pool)?;
        }
        LogEntry::Redo => {
            history.redo(pool)?;
        }
    }
    pool.take_journal();
    Ok(())
}
