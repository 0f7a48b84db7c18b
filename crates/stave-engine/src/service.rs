use std::thread::{self, JoinHandle};

use stave_command::{Command, CommandRequest, DynCommand};
use stave_journal::CheckpointHeader;
use stave_pool::Pool;
use stave_replica::{EventFilter, HubStats, Subscription};
use stave_types::NodeId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::document::{Commit, Document};
use crate::error::{EngineError, EngineResult};

type Reply<T> = oneshot::Sender<EngineResult<T>>;

enum Request {
    Dispatch {
        target: NodeId,
        command: Box<dyn DynCommand>,
        reply: Reply<Commit>,
    },
    DispatchRequest {
        request: CommandRequest,
        reply: Reply<Commit>,
    },
    Undo(Reply<Commit>),
    Redo(Reply<Commit>),
    Checkpoint(Reply<CheckpointHeader>),
    Subscribe {
        filter: EventFilter,
        reply: oneshot::Sender<Subscription>,
    },
    Read(Box<dyn FnOnce(&Pool) + Send>),
    Stats(oneshot::Sender<HubStats>),
    Close(Reply<()>),
}

/// Runs a [`Document`] on a dedicated thread behind one ordered queue.
///
/// Requests are handled strictly in arrival order. Checkpoint files are
/// written on a helper thread so queued commands keep flowing; a new
/// checkpoint waits for the previous write to finish.
pub struct DocumentService;

impl DocumentService {
    /// Move the document onto its own thread and return a handle to it.
    pub fn spawn(mut document: Document) -> EngineResult<DocumentHandle> {
        let (tx, rx) = mpsc::channel(document.config().queue_capacity.max(1));
        document.defer_auto_checkpoint();
        let id = document.document_id();
        thread::Builder::new()
            .name(format!("stave-doc-{}", id.short_id()))
            .spawn(move || Worker::new(document).run(rx))?;
        info!(document = %id, "document service started");
        Ok(DocumentHandle { tx })
    }
}

struct Worker {
    document: Option<Document>,
    writer: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(document: Document) -> Self {
        Self {
            document: Some(document),
            writer: None,
        }
    }

    fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(request) = rx.blocking_recv() {
            if let Request::Close(reply) = request {
                let _ = reply.send(self.close());
                break;
            }
            self.handle(request);
        }
        if self.document.is_some() {
            if let Err(e) = self.close() {
                error!(error = %e, "document close failed");
            }
        }
        debug!("document service stopped");
    }

    fn handle(&mut self, request: Request) {
        let Some(doc) = self.document.as_mut() else {
            return;
        };
        match request {
            Request::Dispatch {
                target,
                command,
                reply,
            } => {
                let result = doc.dispatch(target, command.as_ref());
                let _ = reply.send(result);
                self.after_commit();
            }
            Request::DispatchRequest { request, reply } => {
                let _ = reply.send(doc.dispatch_request(&request));
                self.after_commit();
            }
            Request::Undo(reply) => {
                let _ = reply.send(doc.undo());
                self.after_commit();
            }
            Request::Redo(reply) => {
                let _ = reply.send(doc.redo());
                self.after_commit();
            }
            Request::Checkpoint(reply) => self.checkpoint(Some(reply)),
            Request::Subscribe { filter, reply } => {
                let _ = reply.send(doc.subscribe(filter));
            }
            Request::Read(f) => f(doc.pool()),
            Request::Stats(reply) => {
                let _ = reply.send(doc.hub_stats());
            }
            Request::Close(_) => {}
        }
    }

    fn after_commit(&mut self) {
        let due = self.document.as_ref().is_some_and(Document::checkpoint_due);
        if due {
            self.checkpoint(None);
        }
    }

    /// Rotate in the queue, write on the helper thread.
    fn checkpoint(&mut self, reply: Option<Reply<CheckpointHeader>>) {
        self.join_writer();
        let Some(doc) = self.document.as_mut() else {
            return;
        };
        let job = match doc.begin_checkpoint() {
            Ok(job) => job,
            Err(e) => {
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(e));
                    }
                    None => warn!(error = %e, "automatic checkpoint failed to start"),
                }
                return;
            }
        };
        let sequence = job.sequence();
        let spawned = thread::Builder::new()
            .name(format!("stave-checkpoint-{sequence}"))
            .spawn(move || {
                let result = job.write();
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(sequence, error = %e, "automatic checkpoint failed");
                        }
                    }
                }
            });
        match spawned {
            Ok(handle) => self.writer = Some(handle),
            Err(e) => error!(sequence, error = %e, "cannot start checkpoint writer"),
        }
    }

    fn join_writer(&mut self) {
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                error!("checkpoint writer panicked");
            }
        }
    }

    fn close(&mut self) -> EngineResult<()> {
        self.join_writer();
        match self.document.take() {
            Some(doc) => doc.close(),
            None => Ok(()),
        }
    }
}

/// Cloneable async front door to a running [`DocumentService`].
#[derive(Clone, Debug)]
pub struct DocumentHandle {
    tx: mpsc::Sender<Request>,
}

impl DocumentHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::ServiceClosed)?;
        rx.await.map_err(|_| EngineError::ServiceClosed)?
    }

    pub async fn dispatch<C: Command>(&self, target: NodeId, command: C) -> EngineResult<Commit> {
        let command: Box<dyn DynCommand> = Box::new(command);
        self.call(|reply| Request::Dispatch {
            target,
            command,
            reply,
        })
        .await
    }

    pub async fn dispatch_request(&self, request: CommandRequest) -> EngineResult<Commit> {
        self.call(|reply| Request::DispatchRequest { request, reply })
            .await
    }

    pub async fn undo(&self) -> EngineResult<Commit> {
        self.call(Request::Undo).await
    }

    pub async fn redo(&self) -> EngineResult<Commit> {
        self.call(Request::Redo).await
    }

    /// Resolves once the checkpoint file and pointer are durable.
    pub async fn checkpoint(&self) -> EngineResult<CheckpointHeader> {
        self.call(Request::Checkpoint).await
    }

    pub async fn subscribe(&self, filter: EventFilter) -> EngineResult<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Subscribe { filter, reply })
            .await
            .map_err(|_| EngineError::ServiceClosed)?;
        rx.await.map_err(|_| EngineError::ServiceClosed)
    }

    /// Run `f` against the pool between two requests.
    pub async fn read<R, F>(&self, f: F) -> EngineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Pool) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job = Box::new(move |pool: &Pool| {
            let _ = reply.send(f(pool));
        });
        self.tx
            .send(Request::Read(job))
            .await
            .map_err(|_| EngineError::ServiceClosed)?;
        rx.await.map_err(|_| EngineError::ServiceClosed)
    }

    pub async fn stats(&self) -> EngineResult<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Stats(reply))
            .await
            .map_err(|_| EngineError::ServiceClosed)?;
        rx.await.map_err(|_| EngineError::ServiceClosed)
    }

    /// Finish pending writes, sync the log and stop the service.
    pub async fn close(&self) -> EngineResult<()> {
        self.call(Request::Close).await
    }
}

#[cfg(test)]
mod tests {
    use stave_command::builtin::{InsertChild, Rename};
    use stave_pool::{NodeArgs, NodeClass};
    use stave_replica::Replica;
    use stave_types::ErrorKind;

    use super::*;
    use crate::config::EngineConfig;

    fn rename(name: &str) -> Rename {
        Rename {
            new_name: name.into(),
        }
    }

    #[tokio::test]
    async fn handle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
        let root = doc.root();
        let handle = DocumentService::spawn(doc).unwrap();

        let commit = handle.dispatch(root, rename("Live")).await.unwrap();
        assert_eq!(commit.seq, 1);
        let name = handle
            .read(move |pool| pool.get(root).ok().and_then(|n| n.text("name")).map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("Live"));

        let header = handle.checkpoint().await.unwrap();
        assert_eq!((header.sequence, header.commit_seq), (1, 1));
        handle.close().await.unwrap();
        assert!(matches!(
            handle.undo().await,
            Err(EngineError::ServiceClosed)
        ));

        let doc = Document::open(dir.path(), EngineConfig::for_testing()).unwrap();
        assert_eq!(doc.commit_seq(), 1);
    }

    #[tokio::test]
    async fn rejected_requests_reach_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
        let root = doc.root();
        let handle = DocumentService::spawn(doc).unwrap();
        let err = handle.dispatch(root, rename("   ")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
        assert!(matches!(handle.redo().await, Err(EngineError::NothingToRedo)));
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn replica_follows_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
        let root = doc.root();
        let handle = DocumentService::spawn(doc).unwrap();

        let mut replica = Replica::attach(handle.subscribe(EventFilter::all()).await.unwrap()).unwrap();
        let commit = handle
            .dispatch(
                root,
                InsertChild::new("tracks", 0, NodeClass::Track)
                    .with_args(NodeArgs::new().set("name", "Keys")),
            )
            .await
            .unwrap();
        handle.dispatch(commit.minted[0], rename("Piano")).await.unwrap();
        handle.undo().await.unwrap();

        for expected in 1..=3 {
            assert_eq!(replica.next().await.unwrap(), expected);
        }
        let live = handle.read(|pool| pool.snapshot()).await.unwrap();
        assert_eq!(replica.pool().snapshot(), live);
        assert_eq!(handle.stats().await.unwrap().batches_delivered, 3);
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn automatic_checkpoints_run_in_the_background() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            auto_checkpoint_every: Some(3),
            ..EngineConfig::for_testing()
        };
        let doc = Document::create(dir.path(), config.clone()).unwrap();
        let root = doc.root();
        let handle = DocumentService::spawn(doc).unwrap();
        for n in 0..7 {
            handle.dispatch(root, rename(&format!("v{n}"))).await.unwrap();
        }
        handle.close().await.unwrap();

        let summary = stave_journal::inspect(dir.path()).unwrap();
        assert_eq!(summary.pointer.map(|p| p.checkpoint), Some(2));
        let doc = Document::open(dir.path(), config).unwrap();
        assert_eq!(doc.commit_seq(), 7);
        assert_eq!(
            doc.pool().get(root).unwrap().text("name"),
            Some("v6")
        );
    }
}
