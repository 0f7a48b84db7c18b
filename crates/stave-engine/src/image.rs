use serde::{Deserialize, Serialize};
use stave_pool::{Pool, Snapshot};

use crate::error::{EngineError, EngineResult};
use crate::history::History;

/// Current document image encoding version.
pub const IMAGE_FORMAT: u32 = 1;

/// Checkpoint payload: the tree plus the undo/redo history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentImage {
    pub format: u32,
    pub snapshot: Snapshot,
    pub history: History,
}

impl DocumentImage {
    pub fn capture(pool: &Pool, history: &History) -> Self {
        Self {
            format: IMAGE_FORMAT,
            snapshot: pool.snapshot(),
            history: history.clone(),
        }
    }

    pub fn encode(&self) -> EngineResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| EngineError::Image(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        let image: Self =
            bincode::deserialize(bytes).map_err(|e| EngineError::Image(e.to_string()))?;
        if image.format != IMAGE_FORMAT {
            return Err(EngineError::Image(format!(
                "unsupported image format {}",
                image.format
            )));
        }
        Ok(image)
    }

    /// Split into a live pool and its history.
    pub fn restore(self) -> EngineResult<(Pool, History)> {
        let pool = Pool::from_snapshot(self.snapshot)?;
        Ok((pool, self.history))
    }
}

#[cfg(test)]
mod tests {
    use stave_pool::{NodeArgs, NodeClass};

    use super::*;

    #[test]
    fn history_travels_with_the_tree() {
        let mut pool = Pool::new(NodeClass::Project, &NodeArgs::new().set("name", "A")).unwrap();
        let mut history = History::new(8);
        let root = pool.root();
        pool.set(root, "name", "B").unwrap();
        history.record(pool.take_journal());

        let bytes = DocumentImage::capture(&pool, &history).encode().unwrap();
        let (mut restored, mut restored_history) = DocumentImage::decode(&bytes).unwrap().restore().unwrap();
        assert_eq!(restored.snapshot(), pool.snapshot());
        assert_eq!(restored_history, history);

        restored_history.undo(&mut restored).unwrap();
        assert_eq!(restored.get(root).unwrap().text("name"), Some("A"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            DocumentImage::decode(&[7, 7, 7]),
            Err(EngineError::Image(_))
        ));
    }
}
