//! Blockchain resource identifier

use crate::error::{decode_hex, PrimitiveError};
use std::fmt;

/// Global identifier of a blockchain (32 bytes).
///
/// This is the name other nodes use for a chain on the wire. It is unique
/// across the network, unlike [`ChainId`](crate::ChainId) which is local.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockchainRid([u8; 32]);

impl BlockchainRid {
    /// Size in bytes
    pub const LEN: usize = 32;

    /// All-zero rid
    pub const ZERO: BlockchainRid = BlockchainRid([0u8; 32]);

    /// Create from bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        BlockchainRid(bytes)
    }

    /// Create a rid with every byte set to `byte`
    pub const fn repeat(byte: u8) -> Self {
        BlockchainRid([byte; 32])
    }

    /// Create from slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, PrimitiveError> {
        if slice.len() != Self::LEN {
            return Err(PrimitiveError::InvalidLength {
                expected: Self::LEN,
                got: slice.len(),
            });
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(BlockchainRid(bytes))
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, PrimitiveError> {
        Self::from_slice(&decode_hex(s)?)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string (no prefix)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four bytes in hex, for log lines
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for BlockchainRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockchainRid({})", self.to_hex())
    }
}

impl fmt::Display for BlockchainRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for BlockchainRid {
    fn from(bytes: [u8; 32]) -> Self {
        BlockchainRid(bytes)
    }
}

impl AsRef<[u8]> for BlockchainRid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_from_hex() {
        let rid = BlockchainRid::from_hex(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(rid.as_bytes()[31], 1);
    }

    #[test]
    fn test_rid_from_hex_wrong_length() {
        let result = BlockchainRid::from_hex("0x0102");
        match result {
            Err(PrimitiveError::InvalidLength { expected: 32, got: 2 }) => {}
            _ => panic!("Expected InvalidLength error"),
        }
    }

    #[test]
    fn test_rid_from_hex_invalid_chars() {
        let result = BlockchainRid::from_hex(&"g".repeat(64));
        assert!(matches!(result, Err(PrimitiveError::InvalidHex(_))));
    }

    #[test]
    fn test_rid_repeat() {
        let rid = BlockchainRid::repeat(0x01);
        assert_eq!(rid.as_bytes(), &[0x01; 32]);
        assert_ne!(rid, BlockchainRid::ZERO);
    }

    #[test]
    fn test_rid_display_is_plain_hex() {
        let rid = BlockchainRid::repeat(0xab);
        assert_eq!(format!("{}", rid), "ab".repeat(32));
        assert_eq!(rid.short_hex(), "abababab");
    }

    #[test]
    fn test_rid_debug() {
        let debug = format!("{:?}", BlockchainRid::ZERO);
        assert!(debug.starts_with("BlockchainRid("));
    }
}
