//! Node identifier

use crate::error::{decode_hex, PrimitiveError};
use std::fmt;

/// Identifier of a node, derived from its public key.
///
/// Ordering is lexicographic over the raw bytes, which is the same order as
/// comparing the lowercase hex forms.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeRid(Vec<u8>);

impl NodeRid {
    /// Create from public key bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, PrimitiveError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(PrimitiveError::Empty);
        }
        Ok(NodeRid(bytes))
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, PrimitiveError> {
        Self::new(decode_hex(s)?)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to hex string (no prefix)
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Abbreviated hex form used in log lines
    pub fn short_hex(&self) -> String {
        if self.0.len() <= 4 {
            self.to_hex()
        } else {
            format!(
                "{}..{}",
                hex::encode(&self.0[..2]),
                hex::encode(&self.0[self.0.len() - 2..])
            )
        }
    }
}

impl fmt::Debug for NodeRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRid({})", self.short_hex())
    }
}

impl fmt::Display for NodeRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for NodeRid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
