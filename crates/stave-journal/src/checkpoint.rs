//! Checkpoint files.
//!
//! On-disk format:
//! ```text
//! [8 bytes: magic "STAVECKP"]
//! [4 bytes: header length (little-endian u32)]
//! [N bytes: header (bincode CheckpointHeader)]
//! [M bytes: payload (encoded document image)]
//! ```
//!
//! The header carries the payload length and its BLAKE3 hash, so a
//! truncated or bit-flipped checkpoint is rejected on load.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stave_types::DocumentId;
use tracing::{debug, info};

use crate::error::{JournalError, JournalResult};
use crate::layout;

pub const CHECKPOINT_MAGIC: [u8; 8] = *b"STAVECKP";
pub const CHECKPOINT_FORMAT: u32 = 1;

/// Metadata written in front of every checkpoint payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    pub format: u32,
    pub document_id: DocumentId,
    /// N in `state.<N>.checkpoint`.
    pub sequence: u64,
    /// Commit sequence of the last log record folded into this image.
    pub commit_seq: u64,
    pub created_at: DateTime<Utc>,
    pub payload_len: u64,
    pub payload_hash: [u8; 32],
}

impl CheckpointHeader {
    pub fn payload_hash_hex(&self) -> String {
        blake3::Hash::from(self.payload_hash).to_hex().to_string()
    }
}

/// A verified checkpoint: header plus payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub header: CheckpointHeader,
    pub payload: Vec<u8>,
}

/// Write `state.<sequence>.checkpoint` atomically.
pub fn write_checkpoint(
    dir: &Path,
    document_id: DocumentId,
    sequence: u64,
    commit_seq: u64,
    payload: &[u8],
) -> JournalResult<CheckpointHeader> {
    let header = CheckpointHeader {
        format: CHECKPOINT_FORMAT,
        document_id,
        sequence,
        commit_seq,
        created_at: Utc::now(),
        payload_len: payload.len() as u64,
        payload_hash: *blake3::hash(payload).as_bytes(),
    };
    let encoded =
        bincode::serialize(&header).map_err(|e| JournalError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(12 + encoded.len() + payload.len());
    bytes.extend_from_slice(&CHECKPOINT_MAGIC);
    bytes.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&encoded);
    bytes.extend_from_slice(payload);

    layout::write_atomically(dir, &layout::checkpoint_name(sequence), &bytes)?;
    info!(sequence, commit_seq, bytes = bytes.len(), "checkpoint written");
    Ok(header)
}

/// Read and verify a checkpoint file.
///
/// With `expected` set, a checkpoint of another document is rejected.
pub fn read_checkpoint(path: &Path, expected: Option<DocumentId>) -> JournalResult<Checkpoint> {
    let bytes = fs::read(path)?;
    let corrupt = |reason: String| JournalError::corrupt(path, reason);

    if bytes.len() < 12 || bytes[..8] != CHECKPOINT_MAGIC {
        return Err(corrupt("bad magic".into()));
    }
    let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let body = &bytes[12..];
    if header_len > body.len() {
        return Err(corrupt(format!(
            "header length {header_len} exceeds file size {}",
            bytes.len()
        )));
    }
    let header: CheckpointHeader = bincode::deserialize(&body[..header_len])
        .map_err(|e| corrupt(format!("undecodable header: {e}")))?;
    if header.format != CHECKPOINT_FORMAT {
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

    let payload = &body[header_len..];
    if payload.len() as u64 != header.payload_len {
        return Err(corrupt(format!(
            "payload is {} bytes, header declares {}",
            payload.len(),
            header.payload_len
        )));
    }
    if blake3::hash(payload).as_bytes() != &header.payload_hash {
        return Err(corrupt("payload hash mismatch".into()));
    }
    debug!(path = %path.display(), sequence = header.sequence, "checkpoint verified");
    Ok(Checkpoint {
        header,
        payload: payload.to_vec(),
    })
}

/// Path of checkpoint `sequence` under `dir`.
pub fn path_of(dir: &Path, sequence: u64) -> PathBuf {
    layout::checkpoint_path(dir, sequence)
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use super::*;

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentId::new();
        let header = write_checkpoint(dir.path(), doc, 3, 41, b"image bytes").unwrap();
        let ckp = read_checkpoint(&path_of(dir.path(), 3), Some(doc)).unwrap();
        assert_eq!(ckp.header, header);
        assert_eq!(ckp.payload, b"image bytes");
        assert_eq!(ckp.header.commit_seq, 41);
        assert_eq!(ckp.header.payload_hash_hex().len(), 64);
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentId::new();
        write_checkpoint(dir.path(), doc, 0, 0, b"abcdef").unwrap();
        let path = path_of(dir.path(), 0);
        let len = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(len - 1)).unwrap();
            file.write_all(b"X").unwrap();
        }
        let err = read_checkpoint(&path, Some(doc)).unwrap_err();
        assert!(matches!(err, JournalError::Corrupt { ref reason, .. } if reason.contains("hash")));
    }

    #[test]
    fn truncation_and_bad_magic_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentId::new();
        write_checkpoint(dir.path(), doc, 0, 0, b"abcdef").unwrap();
        let path = path_of(dir.path(), 0);
        let bytes = fs::read(&path).unwrap();

        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        assert!(matches!(
            read_checkpoint(&path, None),
            Err(JournalError::Corrupt { .. })
        ));

        fs::write(&path, b"NOTACKPT").unwrap();
        assert!(matches!(
            read_checkpoint(&path, None),
            Err(JournalError::Corrupt { .. })
        ));
    }

    #[test]
    fn other_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), DocumentId::new(), 0, 0, b"x").unwrap();
        let err = read_checkpoint(&path_of(dir.path(), 0), Some(DocumentId::new())).unwrap_err();
        assert!(matches!(err, JournalError::WrongDocument { .. }));
    }
}
