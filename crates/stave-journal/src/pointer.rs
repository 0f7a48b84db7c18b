use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stave_types::DocumentId;

use crate::error::{JournalError, JournalResult};
use crate::layout::{self, LATEST_FILE};

/// Contents of `state.latest`: which checkpoint a reopen starts from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub document_id: DocumentId,
    pub checkpoint: u64,
    pub written_at: DateTime<Utc>,
}

impl LatestPointer {
    pub fn new(document_id: DocumentId, checkpoint: u64) -> Self {
        Self {
            document_id,
            checkpoint,
            written_at: Utc::now(),
        }
    }

    /// Replace `state.latest` atomically.
    pub fn write(&self, dir: &Path) -> JournalResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        layout::write_atomically(dir, LATEST_FILE, &json)?;
        Ok(())
    }

    /// Read `state.latest`; `None` when the file does not exist.
    pub fn read(dir: &Path) -> JournalResult<Option<Self>> {
        let path = dir.join(LATEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| JournalError::corrupt(path, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LatestPointer::read(dir.path()).unwrap(), None);
        let pointer = LatestPointer::new(DocumentId::new(), 4);
        pointer.write(dir.path()).unwrap();
        assert_eq!(LatestPointer::read(dir.path()).unwrap(), Some(pointer));
    }

    #[test]
    fn garbage_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LATEST_FILE), b"{not json").unwrap();
        assert!(matches!(
            LatestPointer::read(dir.path()),
            Err(JournalError::Corrupt { .. })
        ));
    }
}
