//! Command log segments.
//!
//! On-disk format:
//! ```text
//! [8 bytes: magic "STAVELOG"]
//! [4 bytes: header length (little-endian u32)]
//! [N bytes: header (bincode SegmentHeader)]
//! then repeated frames:
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [M bytes: payload (bincode LogRecord)]
//! ```
//!
//! Only the final frame of a segment may be incomplete: that is a crash in
//! the middle of an append and is cut off. A bad frame anywhere before the
//! tail means the log itself is damaged.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stave_types::{DocumentId, NodeId};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use crate::config::SyncMode;
use crate::error::{JournalError, JournalResult};
use crate::layout;

pub const LOG_MAGIC: [u8; 8] = *b"STAVELOG";
pub const LOG_FORMAT: u32 = 1;

/// Frame header size: 4 bytes length + 4 bytes CRC.
const FRAME_HEADER: usize = 8;

/// Metadata at the start of every segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub format: u32,
    pub document_id: DocumentId,
    /// N in `state.<N>.log`; the segment follows checkpoint N.
    pub segment: u64,
    pub created_at: DateTime<Utc>,
}

/// What a log record replays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// A committed command with the ids it minted, in creation order.
    Command {
        target: NodeId,
        command: String,
        args: Vec<u8>,
        minted: Vec<NodeId>,
    },
    Undo,
    Redo,
}

impl LogEntry {
    /// Short label for listings.
    pub fn label(&self) -> &str {
        match self {
            Self::Command { command, .. } => command,
            Self::Undo => "Undo",
            Self::Redo => "Redo",
        }
    }
}

/// One framed log record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Commit sequence, contiguous across segments.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub entry: LogEntry,
}

impl LogRecord {
    pub fn new(seq: u64, entry: LogEntry) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            entry,
        }
    }
}

fn encode_header(header: &SegmentHeader) -> JournalResult<Vec<u8>> {
    let encoded =
        bincode::serialize(header).map_err(|e| JournalError::Serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(12 + encoded.len());
    bytes.extend_from_slice(&LOG_MAGIC);
    bytes.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&encoded);
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append handle on the active segment.
///
/// Each frame goes to the file in one write. An append that fails cuts the
/// file back to the last complete frame; if that cut fails too the writer
/// is poisoned and refuses every later append.
pub struct SegmentWriter {
    path: PathBuf,
    segment: u64,
    file: File,
    /// End of the last complete frame.
    offset: u64,
    sync_mode: SyncMode,
    last_sync: Instant,
    poisoned: bool,
    #[cfg(any(test, feature = "fault-injection"))]
    fault: Option<usize>,
}

impl SegmentWriter {
    /// Create `state.<segment>.log` with its header already durable.
    pub fn create(
        dir: &Path,
        document_id: DocumentId,
        segment: u64,
        sync_mode: SyncMode,
    ) -> JournalResult<Self> {
        let path = layout::segment_path(dir, segment);
        if path.exists() {
            return Err(JournalError::AlreadyExists(path));
        }
        let header = encode_header(&SegmentHeader {
            format: LOG_FORMAT,
            document_id,
            segment,
            created_at: Utc::now(),
        })?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&header)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&path).map_err(|e| e.error)?;
        layout::sync_dir(dir)?;
        debug!(segment, path = %path.display(), "log segment created");
        Self::open_at(path, segment, header.len() as u64, sync_mode)
    }

    /// Reopen an existing segment for appending after its last valid frame.
    ///
    /// Bytes past `valid_len` (a torn final frame) are cut off first.
    pub fn reopen(
        path: PathBuf,
        segment: u64,
        valid_len: u64,
        sync_mode: SyncMode,
    ) -> JournalResult<Self> {
        let file = OpenOptions::new().write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len > valid_len {
            warn!(path = %path.display(), cut = len - valid_len, "truncating torn log tail");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);
        Self::open_at(path, segment, valid_len, sync_mode)
    }

    fn open_at(path: PathBuf, segment: u64, offset: u64, sync_mode: SyncMode) -> JournalResult<Self> {
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            segment,
            file,
            offset,
            sync_mode,
            last_sync: Instant::now(),
            poisoned: false,
            #[cfg(any(test, feature = "fault-injection"))]
            fault: None,
        })
    }

    /// Append one record. Returns the byte offset of its frame.
    ///
    /// On error nothing of the record remains in the segment.
    pub fn append(&mut self, record: &LogRecord) -> JournalResult<u64> {
        if self.poisoned {
            return Err(JournalError::LogPoisoned(self.path.clone()));
        }
        let payload =
            bincode::serialize(record).map_err(|e| JournalError::Serialization(e.to_string()))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        let frame_offset = self.offset;

        if let Err(e) = self.write_frame(&frame) {
            self.discard_tail();
            return Err(e.into());
        }
        let due = match self.sync_mode {
            SyncMode::EveryWrite => true,
            SyncMode::Periodic { interval_ms } => {
                self.last_sync.elapsed() >= Duration::from_millis(interval_ms)
            }
            SyncMode::OsDefault => false,
        };
        if due {
            if let Err(e) = self.sync() {
                self.discard_tail();
                return Err(e);
            }
        }

        self.offset += frame.len() as u64;
        debug!(segment = self.segment, seq = record.seq, offset = frame_offset, len = payload.len(), "log append");
        Ok(frame_offset)
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.injected_fault(frame)?;
        self.file.write_all(frame)
    }

    #[cfg(any(test, feature = "fault-injection"))]
    fn injected_fault(&mut self, frame: &[u8]) -> io::Result<()> {
        match self.fault.take() {
            Some(written) => {
                self.file.write_all(&frame[..written.min(frame.len())])?;
                Err(io::Error::other("simulated write failure"))
            }
            None => Ok(()),
        }
    }

    #[cfg(not(any(test, feature = "fault-injection")))]
    fn injected_fault(&mut self, _frame: &[u8]) -> io::Result<()> {
        Ok(())
    }

    /// Cut the segment back to the last complete frame.
    fn discard_tail(&mut self) {
        let cut = self
            .file
            .set_len(self.offset)
            .and_then(|()| self.file.sync_all());
        match cut {
            Ok(()) => warn!(segment = self.segment, offset = self.offset, "failed append discarded"),
            Err(e) => {
                error!(segment = self.segment, error = %e, "cannot discard failed append; log poisoned");
                self.poisoned = true;
            }
        }
    }

    /// Make the next append write only `written` bytes of its frame and
    /// then fail.
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn fail_next_append(&mut self, written: usize) {
        self.fault = Some(written);
    }

    /// `fsync` the segment.
    pub fn sync(&mut self) -> JournalResult<()> {
        if self.poisoned {
            return Err(JournalError::LogPoisoned(self.path.clone()));
        }
        self.file.sync_all()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn segment(&self) -> u64 {
        self.segment
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Decoded contents of one segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentContents {
    pub header: SegmentHeader,
    pub records: Vec<LogRecord>,
    /// Length of the header plus every complete frame.
    pub valid_len: u64,
    /// Bytes of an incomplete final frame, zero for a clean segment.
    pub torn_bytes: u64,
}

/// Read and verify a whole segment.
///
/// With `expected` set, a segment of another document is rejected.
pub fn read_segment(path: &Path, expected: Option<DocumentId>) -> JournalResult<SegmentContents> {
    let bytes = fs::read(path)?;
    let corrupt = |reason: String| JournalError::corrupt(path, reason);

    if bytes.len() < 12 || bytes[..8] != LOG_MAGIC {
        return Err(corrupt("bad magic".into()));
    }
    let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let frames_start = 12 + header_len;
    if frames_start > bytes.len() {
        return Err(corrupt("truncated segment header".into()));
    }
    let header: SegmentHeader = bincode::deserialize(&bytes[12..frames_start])
        .map_err(|e| corrupt(format!("undecodable header: {e}")))?;
    if header.format != LOG_FORMAT {
        return Err(corrupt(format!("unsupported format {}", header.format)));
    }
    if let Some(expected) = expected {
        if header.document_id != expected {
            return Err(JournalError::WrongDocument {
                path: path.to_path_buf(),
                expected,
                found: header.document_id,
            });
        }
    }

    let file_len = bytes.len();
    let mut records = Vec::new();
    let mut offset = frames_start;
    let mut torn_bytes = 0u64;

    while offset < file_len {
        if offset + FRAME_HEADER > file_len {
            torn_bytes = (file_len - offset) as u64;
            break;
        }
        let length = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let expected_crc = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]);
        let end = offset + FRAME_HEADER + length;
        if end > file_len {
            torn_bytes = (file_len - offset) as u64;
            break;
        }
        let payload = &bytes[offset + FRAME_HEADER..end];
        let actual_crc = crc32fast::hash(payload);
        if length == 0 || actual_crc != expected_crc {
            if end == file_len {
                torn_bytes = (file_len - offset) as u64;
                break;
            }
            return Err(corrupt(format!(
                "frame at offset {offset} fails its checksum: expected {expected_crc:#010x}, got {actual_crc:#010x}"
            )));
        }
        let record: LogRecord = bincode::deserialize(payload)
            .map_err(|e| corrupt(format!("undecodable record at offset {offset}: {e}")))?;
        records.push(record);
        offset = end;
    }

    if torn_bytes > 0 {
        warn!(path = %path.display(), offset, torn_bytes, "incomplete final frame");
    }
    debug!(path = %path.display(), records = records.len(), "segment read");
    Ok(SegmentContents {
        header,
        records,
        valid_len: offset as u64,
        torn_bytes,
    })
}
