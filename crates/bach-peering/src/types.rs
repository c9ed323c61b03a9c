//! Connection descriptors and peer addressing

use bach_primitives::{BlockchainRid, NodeRid};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Packet bytes produced on demand.
///
/// Encoding is deferred until a connection actually sends, so nothing is
/// encoded for peers that are not connected.
pub type LazyPacket = Arc<dyn Fn() -> Bytes + Send + Sync>;

/// Who dialed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionDirection {
    /// The remote node dialed us
    Incoming,
    /// We dialed the remote node
    Outgoing,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Incoming => write!(f, "in"),
            ConnectionDirection::Outgoing => write!(f, "out"),
        }
    }
}

/// What a connection is for: one chain, one remote node, one direction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionDescriptor {
    /// Chain the connection carries
    pub blockchain_rid: BlockchainRid,
    /// Remote node
    pub node_rid: NodeRid,
    /// Direction
    pub direction: ConnectionDirection,
}

impl ConnectionDescriptor {
    /// Create a new descriptor
    pub fn new(blockchain_rid: BlockchainRid, node_rid: NodeRid, direction: ConnectionDirection) -> Self {
        Self {
            blockchain_rid,
            node_rid,
            direction,
        }
    }

    /// Check if we dialed
    pub fn is_outgoing(&self) -> bool {
        self.direction == ConnectionDirection::Outgoing
    }
}

/// Address and identity of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Host name or IP
    pub host: String,
    /// Port
    pub port: u16,
    /// Node identity
    pub node_rid: NodeRid,
}

impl PeerInfo {
    /// Create peer info
    pub fn new(host: impl Into<String>, port: u16, node_rid: NodeRid) -> Self {
        Self {
            host: host.into(),
            port,
            node_rid,
        }
    }
}
