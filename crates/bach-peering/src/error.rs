//! Peering error types
//!
//! [`NetworkError`] is returned to the caller and means the call itself was
//! wrong. [`Rejection`] describes a race the manager resolved on its own by
//! closing a connection.

use bach_primitives::{BlockchainRid, ChainId, NodeRid};
use thiserror::Error;

/// Peering errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chain registered twice
    #[error("chain {0} is already connected")]
    AlreadyConnected(ChainId),

    /// Chain not registered
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),

    /// Manager was shut down
    #[error("connection manager already shut down")]
    AlreadyShutDown,

    /// Packet addressed to the local node
    #[error("sender can not be the recipient")]
    SendToSelf,

    /// Peer missing from the node directory
    #[error("peer not found: {0}")]
    UnknownPeer(NodeRid),

    /// Blockchain rid already mapped to another chain
    #[error("blockchain {rid} is connected as chain {existing}, can not connect it as chain {requested}")]
    BlockchainRidInUse {
        /// The blockchain rid
        rid: BlockchainRid,
        /// Chain currently holding the rid
        existing: ChainId,
        /// Chain that asked for it
        requested: ChainId,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for peering operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Why an incoming connection callback was turned down.
///
/// None of these are errors; the connection is closed and nothing else changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Remote asked for a blockchain we do not run
    UnknownBlockchain,
    /// We dialed for a chain but no longer know its id
    LostOwnChain,
    /// Chain id known but the chain is no longer registered
    ChainGone,
    /// Peer-quality policy refused the node
    Misbehaving,
    /// Duplicate connection lost the tie-break
    DuplicateLost,
}

/// Packet decoding failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Malformed message from the peer
    #[error("bad message: {0}")]
    BadMessage(String),

    /// Any other decoding failure
    #[error("decode failed: {0}")]
    Other(String),
}
