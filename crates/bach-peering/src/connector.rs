//! Ports between the peering core and its collaborators
//!
//! The transport implements [`NodeConnector`] and [`Connection`] and reports
//! lifecycle changes through [`NodeConnectorEvents`]. Chains plug in a
//! [`PacketCodec`] and a [`PeerQualityPolicy`].

use crate::error::DecodeError;
use crate::types::{ConnectionDescriptor, LazyPacket, PeerInfo};
use bach_primitives::NodeRid;
use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// An authenticated link to one peer, scoped to one chain
pub trait Connection: Send + Sync {
    /// What this connection is for
    fn descriptor(&self) -> &ConnectionDescriptor;

    /// Queue a packet for sending
    fn send_packet(&self, packet: LazyPacket);

    /// Close the link. Must not call back into the manager synchronously.
    fn close(&self);
}

/// Check whether two handles point at the same connection instance
pub fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}

/// Receives decoded-frame payloads from a connection
pub trait PeerPacketHandler: Send + Sync {
    /// Handle packet bytes sent by `sender`
    fn handle(&self, data: Bytes, sender: &NodeRid);
}

impl<F> PeerPacketHandler for F
where
    F: Fn(Bytes, &NodeRid) + Send + Sync,
{
    fn handle(&self, data: Bytes, sender: &NodeRid) {
        self(data, sender)
    }
}

/// Lifecycle callbacks the transport invokes on its own threads
pub trait NodeConnectorEvents: Send + Sync {
    /// A link came up. Returning `None` means the link was refused and closed.
    fn on_node_connected(&self, connection: Arc<dyn Connection>) -> Option<Arc<dyn PeerPacketHandler>>;

    /// A link went down, or a dial failed
    fn on_node_disconnected(&self, connection: Arc<dyn Connection>);
}

/// Dials peers. Success or failure is reported later through [`NodeConnectorEvents`].
pub trait NodeConnector: Send + Sync {
    /// Start dialing `peer` for the chain in `descriptor`
    fn connect_node(&self, descriptor: ConnectionDescriptor, peer: &PeerInfo);

    /// Stop accepting and dialing
    fn shutdown(&self);
}

/// Builds the transport connector for a node
pub trait ConnectorFactory: Send + Sync {
    /// Create a connector for `me` that reports to `events`
    fn create(&self, me: &PeerInfo, events: Weak<dyn NodeConnectorEvents>) -> Arc<dyn NodeConnector>;
}

/// Packet encoding for one chain
pub trait PacketCodec<P>: Send + Sync {
    /// Encode a packet
    fn encode(&self, packet: &P) -> Bytes;

    /// Decode a packet received from `sender`
    fn decode(&self, sender: &NodeRid, data: &[u8]) -> Result<P, DecodeError>;
}

/// Decides whether a node may open a connection right now
pub trait PeerQualityPolicy: Send + Sync {
    /// Check whether `node` is behaving well at `now`
    fn is_node_behaving_well(&self, node: &NodeRid, now: Instant) -> bool;
}
