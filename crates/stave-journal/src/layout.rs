//! File names inside a document directory and the atomic write helper.
//!
//! ```text
//! <dir>/.lock
//! <dir>/state.latest
//! <dir>/state.<N>.checkpoint
//! <dir>/state.<N>.log
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::JournalResult;

pub const LOCK_FILE: &str = ".lock";
pub const LATEST_FILE: &str = "state.latest";

const PREFIX: &str = "state.";
const CHECKPOINT_EXT: &str = ".checkpoint";
const LOG_EXT: &str = ".log";

pub fn checkpoint_name(sequence: u64) -> String {
    format!("{PREFIX}{sequence}{CHECKPOINT_EXT}")
}

pub fn checkpoint_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(checkpoint_name(sequence))
}

pub fn segment_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("{PREFIX}{sequence}{LOG_EXT}"))
}

/// Kind of numbered file in a document directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Checkpoint,
    Segment,
}

fn parse_name(name: &str) -> Option<(FileKind, u64)> {
    let rest = name.strip_prefix(PREFIX)?;
    let (number, kind) = if let Some(n) = rest.strip_suffix(CHECKPOINT_EXT) {
        (n, FileKind::Checkpoint)
    } else {
        (rest.strip_suffix(LOG_EXT)?, FileKind::Segment)
    };
    number.parse().ok().map(|n| (kind, n))
}

/// Sequence numbers of every file of `kind`, ascending.
pub fn list(dir: &Path, kind: FileKind) -> JournalResult<Vec<u64>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some((k, n)) = name.to_str().and_then(parse_name) {
            if k == kind {
                out.push(n);
            }
        }
    }
    out.sort_unstable();
    Ok(out)
}

/// Write `bytes` to `dir/name` through a synced temp file and a rename.
pub fn write_atomically(dir: &Path, name: &str, bytes: &[u8]) -> JournalResult<PathBuf> {
    let path = dir.join(name);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;
    sync_dir(dir)?;
    Ok(path)
}

/// Make a rename or a new file in `dir` durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> JournalResult<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> JournalResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        let dir = Path::new("/doc");
        let ckp = checkpoint_path(dir, 12);
        let log = segment_path(dir, 3);
        let name = |p: &Path| p.file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(parse_name(&name(&ckp)), Some((FileKind::Checkpoint, 12)));
        assert_eq!(parse_name(&name(&log)), Some((FileKind::Segment, 3)));
        assert_eq!(parse_name("state.latest"), None);
        assert_eq!(parse_name("state.x.log"), None);
    }

    #[test]
    fn list_sorts_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for n in [10u64, 2, 1] {
            fs::write(segment_path(dir.path(), n), b"").unwrap();
        }
        fs::write(checkpoint_path(dir.path(), 7), b"").unwrap();
        assert_eq!(list(dir.path(), FileKind::Segment).unwrap(), vec![1, 2, 10]);
        assert_eq!(list(dir.path(), FileKind::Checkpoint).unwrap(), vec![7]);
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        write_atomically(dir.path(), "f", b"one").unwrap();
        let path = write_atomically(dir.path(), "f", b"two").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
