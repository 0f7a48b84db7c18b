use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a document (UUID v7, time-ordered).
///
/// Written into every checkpoint and log segment header so that files copied
/// in from another document are detected on open.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(uuid::Uuid);

impl DocumentId {
    /// Generate a new time-ordered document ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.short_id())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_distinct() {
        let a = DocumentId::new();
        let b = DocumentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn short_id_is_prefix_of_display() {
        let id = DocumentId::new();
        assert!(id.to_string().starts_with(&id.short_id()));
        assert_eq!(id.short_id().len(), 8);
    }
}
