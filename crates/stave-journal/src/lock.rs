use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{JournalError, JournalResult};
use crate::layout::LOCK_FILE;

/// Exclusive advisory lock on a document directory, released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: File,
    path: PathBuf,
}

impl DocumentLock {
    /// Take the lock without blocking.
    pub fn acquire(dir: &Path) -> JournalResult<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(JournalError::LockContention(dir.to_path_buf()));
            }
            return Err(e.into());
        }
        debug!(path = %path.display(), "document lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_contends_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = DocumentLock::acquire(dir.path()).unwrap();
        let err = DocumentLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, JournalError::LockContention(_)));
        drop(first);
        DocumentLock::acquire(dir.path()).unwrap();
    }
}
