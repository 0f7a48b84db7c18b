use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stave_types::DocumentId;
use tracing::{debug, info, warn};

use crate::checkpoint::{self, Checkpoint, CheckpointHeader};
use crate::config::{Retention, StoreConfig};
use crate::error::{JournalError, JournalResult};
use crate::layout::{self, FileKind};
use crate::lock::DocumentLock;
use crate::pointer::LatestPointer;
use crate::segment::{self, LogEntry, LogRecord, SegmentWriter};

/// Everything needed to rebuild a document after [`DocumentStore::open`].
#[derive(Clone, Debug)]
pub struct Recovery {
    pub checkpoint: Checkpoint,
    /// Records logged after the checkpoint, in commit order.
    pub records: Vec<LogRecord>,
    /// Segments the records were read from.
    pub segments: Vec<u64>,
    /// Bytes cut from the end of the last segment.
    pub torn_bytes: u64,
}

/// Writable durability state of one open document directory.
///
/// Holds the directory lock and the active log segment. Commit sequence
/// numbers are contiguous across segments; checkpoint N records the last
/// sequence folded into it and segment N holds what follows.
pub struct DocumentStore {
    dir: PathBuf,
    document_id: DocumentId,
    config: StoreConfig,
    _lock: DocumentLock,
    log: SegmentWriter,
    next_seq: u64,
    in_flight: Arc<AtomicBool>,
}

impl DocumentStore {
    /// Create a new document directory holding checkpoint 0 and segment 0.
    pub fn create(
        dir: &Path,
        document_id: DocumentId,
        image: &[u8],
        config: StoreConfig,
    ) -> JournalResult<Self> {
        if dir.join(layout::LATEST_FILE).exists() {
            return Err(JournalError::AlreadyExists(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;
        let lock = DocumentLock::acquire(dir)?;
        let log = SegmentWriter::create(dir, document_id, 0, config.sync_mode)?;
        checkpoint::write_checkpoint(dir, document_id, 0, 0, image)?;
        LatestPointer::new(document_id, 0).write(dir)?;
        info!(dir = %dir.display(), document = %document_id, "document created");
        Ok(Self {
            dir: dir.to_path_buf(),
            document_id,
            config,
            _lock: lock,
            log,
            next_seq: 1,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Lock the directory and collect the latest checkpoint plus every
    /// record logged after it.
    ///
    /// A torn final frame is cut off. Any other damage, a missing segment,
    /// or a gap in commit sequences is corruption.
    pub fn open(dir: &Path, config: StoreConfig) -> JournalResult<(Self, Recovery)> {
        if !dir.is_dir() {
            return Err(JournalError::NotFound(dir.to_path_buf()));
        }
        let lock = DocumentLock::acquire(dir)?;
        let pointer =
            LatestPointer::read(dir)?.ok_or_else(|| JournalError::NotFound(dir.to_path_buf()))?;
        let document_id = pointer.document_id;
        let ckp = checkpoint::read_checkpoint(
            &layout::checkpoint_path(dir, pointer.checkpoint),
            Some(document_id),
        )?;

        let segments: Vec<u64> = layout::list(dir, FileKind::Segment)?
            .into_iter()
            .filter(|n| *n >= pointer.checkpoint)
            .collect();
        for (expected, found) in (pointer.checkpoint..).zip(&segments) {
            if expected != *found {
                return Err(JournalError::corrupt(
                    layout::segment_path(dir, expected),
                    "log segment missing",
                ));
            }
        }
        let Some(&last) = segments.last() else {
            return Err(JournalError::corrupt(
                layout::segment_path(dir, pointer.checkpoint),
                "log segment missing",
            ));
        };

        let mut records = Vec::new();
        let mut next_seq = ckp.header.commit_seq + 1;
        let mut tail = (0, 0);
        for &n in &segments {
            let path = layout::segment_path(dir, n);
            let contents = segment::read_segment(&path, Some(document_id))?;
            if contents.torn_bytes > 0 && n != last {
                return Err(JournalError::corrupt(path, "incomplete frame before the last segment"));
            }
            for record in contents.records {
                if record.seq != next_seq {
                    return Err(JournalError::corrupt(
                        path,
                        format!("expected commit {next_seq}, found {}", record.seq),
                    ));
                }
                next_seq += 1;
                records.push(record);
            }
            tail = (contents.valid_len, contents.torn_bytes);
        }

        let (valid_len, torn_bytes) = tail;
        let log = SegmentWriter::reopen(
            layout::segment_path(dir, last),
            last,
            valid_len,
            config.sync_mode,
        )?;
        info!(
            dir = %dir.display(),
            checkpoint = pointer.checkpoint,
            segments = segments.len(),
            records = records.len(),
            torn_bytes,
            "document store opened"
        );
        let store = Self {
            dir: dir.to_path_buf(),
            document_id,
            config,
            _lock: lock,
            log,
            next_seq,
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        Ok((
            store,
            Recovery {
                checkpoint: ckp,
                records,
                segments,
                torn_bytes,
            },
        ))
    }

    /// Load the newest checkpoint that verifies, without locking or
    /// touching the log.
    pub fn open_read_only(dir: &Path) -> JournalResult<Checkpoint> {
        if !dir.is_dir() {
            return Err(JournalError::NotFound(dir.to_path_buf()));
        }
        let pointer = match LatestPointer::read(dir) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable latest pointer");
                None
            }
        };
        let expected = pointer.as_ref().map(|p| p.document_id);
        if let Some(p) = &pointer {
            match checkpoint::read_checkpoint(&layout::checkpoint_path(dir, p.checkpoint), expected)
            {
                Ok(ckp) => return Ok(ckp),
                Err(e) => warn!(checkpoint = p.checkpoint, error = %e, "latest checkpoint unusable"),
            }
        }
        let mut last_error = None;
        for n in layout::list(dir, FileKind::Checkpoint)?.into_iter().rev() {
            match checkpoint::read_checkpoint(&layout::checkpoint_path(dir, n), expected) {
                Ok(ckp) => {
                    info!(checkpoint = n, "opened read-only from fallback checkpoint");
                    return Ok(ckp);
                }
                Err(e) => {
                    warn!(checkpoint = n, error = %e, "checkpoint unusable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| JournalError::NotFound(dir.to_path_buf())))
    }

    /// Append a record. Returns its commit sequence.
    pub fn append(&mut self, entry: LogEntry) -> JournalResult<u64> {
        let record = LogRecord::new(self.next_seq, entry);
        self.log.append(&record)?;
        self.next_seq += 1;
        Ok(record.seq)
    }

    /// Rotate the log and hand back the checkpoint to write.
    ///
    /// Records appended from here on go to the new segment. The caller
    /// captures the document image at this point and passes it to
    /// [`PendingCheckpoint::commit`], possibly on another thread.
    pub fn begin_checkpoint(&mut self) -> JournalResult<PendingCheckpoint> {
        let sequence = self.log.segment() + 1;
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(JournalError::CheckpointInProgress(self.log.segment()));
        }
        let rotated = self
            .log
            .sync()
            .and_then(|()| {
                SegmentWriter::create(&self.dir, self.document_id, sequence, self.config.sync_mode)
            });
        match rotated {
            Ok(writer) => self.log = writer,
            Err(e) => {
                self.in_flight.store(false, Ordering::Release);
                return Err(e);
            }
        }
        debug!(sequence, commit_seq = self.last_seq(), "checkpoint begun");
        Ok(PendingCheckpoint {
            dir: self.dir.clone(),
            document_id: self.document_id,
            sequence,
            commit_seq: self.last_seq(),
            retention: self.config.retention,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Rotate and write a checkpoint synchronously.
    pub fn checkpoint(&mut self, image: &[u8]) -> JournalResult<CheckpointHeader> {
        self.begin_checkpoint()?.commit(image)
    }

    pub fn checkpoint_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// `fsync` the active segment.
    pub fn sync(&mut self) -> JournalResult<()> {
        self.log.sync()
    }

    /// Sync and release the lock.
    pub fn close(mut self) -> JournalResult<()> {
        self.log.sync()?;
        info!(dir = %self.dir.display(), last_seq = self.last_seq(), "document store closed");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Sequence of the last appended record, zero before any.
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Number of the active log segment.
    pub fn segment(&self) -> u64 {
        self.log.segment()
    }

    /// See [`SegmentWriter::fail_next_append`].
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn fail_next_append(&mut self, written: usize) {
        self.log.fail_next_append(written);
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("dir", &self.dir)
            .field("document_id", &self.document_id)
            .field("segment", &self.log.segment())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PendingCheckpoint
// ---------------------------------------------------------------------------

/// A checkpoint whose log rotation has happened but whose file is not yet
/// written. Dropping it without committing leaves the previous checkpoint
/// in charge; its segment still replays from there.
#[derive(Debug)]
pub struct PendingCheckpoint {
    dir: PathBuf,
    document_id: DocumentId,
    sequence: u64,
    commit_seq: u64,
    retention: Retention,
    in_flight: Arc<AtomicBool>,
}

impl PendingCheckpoint {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn commit_seq(&self) -> u64 {
        self.commit_seq
    }

    /// Write the checkpoint, move `state.latest` to it, then apply retention.
    pub fn commit(self, image: &[u8]) -> JournalResult<CheckpointHeader> {
        let header = checkpoint::write_checkpoint(
            &self.dir,
            self.document_id,
            self.sequence,
            self.commit_seq,
            image,
        )?;
        LatestPointer::new(self.document_id, self.sequence).write(&self.dir)?;
        if self.retention == Retention::DeleteOnCheckpoint {
            self.prune()?;
        }
        Ok(header)
    }

    fn prune(&self) -> JournalResult<()> {
        let mut removed = 0usize;
        for kind in [FileKind::Checkpoint, FileKind::Segment] {
            for n in layout::list(&self.dir, kind)? {
                if n >= self.sequence {
                    continue;
                }
                let path = match kind {
                    FileKind::Checkpoint => layout::checkpoint_path(&self.dir, n),
                    FileKind::Segment => layout::segment_path(&self.dir, n),
                };
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "cannot remove superseded file"),
                }
            }
        }
        debug!(sequence = self.sequence, removed, "superseded files pruned");
        Ok(())
    }
}

impl Drop for PendingCheckpoint {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Read-only summary of a document directory.
#[derive(Clone, Debug)]
pub struct StoreSummary {
    pub pointer: Option<LatestPointer>,
    pub checkpoints: Vec<CheckpointSummary>,
    pub segments: Vec<SegmentSummary>,
}

#[derive(Clone, Debug)]
pub struct CheckpointSummary {
    pub sequence: u64,
    pub header: Result<CheckpointHeader, String>,
}

#[derive(Clone, Debug)]
pub struct SegmentSummary {
    pub sequence: u64,
    pub records: usize,
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
    pub torn_bytes: u64,
    pub error: Option<String>,
}

/// Summarize every checkpoint and segment without locking or repairing.
pub fn inspect(dir: &Path) -> JournalResult<StoreSummary> {
    if !dir.is_dir() {
        return Err(JournalError::NotFound(dir.to_path_buf()));
    }
    let pointer = LatestPointer::read(dir)?;
    let expected = pointer.as_ref().map(|p| p.document_id);

    let checkpoints = layout::list(dir, FileKind::Checkpoint)?
        .into_iter()
        .map(|sequence| CheckpointSummary {
            sequence,
            header: checkpoint::read_checkpoint(&layout::checkpoint_path(dir, sequence), expected)
                .map(|c| c.header)
                .map_err(|e| e.to_string()),
        })
        .collect();

    let segments = layout::list(dir, FileKind::Segment)?
        .into_iter()
        .map(|sequence| {
            match segment::read_segment(&layout::segment_path(dir, sequence), expected) {
                Ok(c) => SegmentSummary {
                    sequence,
                    records: c.records.len(),
                    first_seq: c.records.first().map(|r| r.seq),
                    last_seq: c.records.last().map(|r| r.seq),
                    torn_bytes: c.torn_bytes,
                    error: None,
                },
                Err(e) => SegmentSummary {
                    sequence,
                    records: 0,
                    first_seq: None,
                    last_seq: None,
                    torn_bytes: 0,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    Ok(StoreSummary {
        pointer,
        checkpoints,
        segments,
    })
}

/// Every record logged after the latest checkpoint, without locking.
pub fn read_log(dir: &Path) -> JournalResult<Vec<LogRecord>> {
    let pointer =
        LatestPointer::read(dir)?.ok_or_else(|| JournalError::NotFound(dir.to_path_buf()))?;
    let mut records = Vec::new();
    for n in layout::list(dir, FileKind::Segment)? {
        if n < pointer.checkpoint {
            continue;
        }
        let contents =
            segment::read_segment(&layout::segment_path(dir, n), Some(pointer.document_id))?;
        records.extend(contents.records);
    }
    Ok(records)
}
