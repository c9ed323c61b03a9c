//! Identifier parsing errors

use thiserror::Error;

/// Identifier parsing error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Invalid hex string
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Invalid length
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        got: usize,
    },

    /// Empty identifier
    #[error("identifier must not be empty")]
    Empty,
}

/// Decode a hex string with an optional 0x prefix
pub(crate) fn decode_hex(s: &str) -> Result<Vec<u8>, PrimitiveError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| PrimitiveError::InvalidHex(e.to_string()))
}
