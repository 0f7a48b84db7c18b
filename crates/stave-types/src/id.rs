use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of one node in a document tree.
///
/// A `NodeId` is a random, non-zero 64-bit value assigned when the node is
/// created. It is stable for the node's lifetime and is the only key used to
/// address nodes in mutation events, commands, and weak references.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Draw a fresh random identity. Never returns the null id.
    pub fn random() -> Self {
        loop {
            let raw: u64 = rand::random();
            if raw != 0 {
                return Self(raw);
            }
        }
    }

    /// Wrap a raw value. Returns an error for zero, which is reserved.
    pub fn from_raw(raw: u64) -> Result<Self, TypeError> {
        if raw == 0 {
            return Err(TypeError::NullId);
        }
        Ok(Self(raw))
    }

    /// The raw 64-bit value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Full hex-encoded string (16 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0.to_be_bytes()[..4])
    }

    /// Parse from a hex string, with or without the `n:` prefix.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("n:").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidLength {
                expected: 8,
                actual: bytes.len(),
            })?;
        Self::from_raw(u64::from_be_bytes(arr))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n:{}", self.to_hex())
    }
}

impl std::str::FromStr for NodeId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
