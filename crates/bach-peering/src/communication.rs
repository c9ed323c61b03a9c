//! Per-chain packet exchange
//!
//! A [`CommunicationManager`] is the chain worker's view of the network: typed
//! packets in, typed packets out. Inbound bytes are decoded on the transport
//! thread that delivered them and queued until the worker drains them with
//! [`get_packets`](CommunicationManager::get_packets).

use crate::config::{ChainPeersConfig, ChainRole};
use crate::connector::{PacketCodec, PeerPacketHandler, PeerQualityPolicy};
use crate::error::{DecodeError, NetworkError, NetworkResult};
use crate::manager::ConnectionManager;
use crate::nodes::NetworkNodes;
use crate::types::LazyPacket;
use bach_primitives::{BlockchainRid, ChainId, NodeRid};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, trace, warn};

/// Decoded packets waiting for the chain worker
struct Inbound<P> {
    chain_id: ChainId,
    codec: Arc<dyn PacketCodec<P>>,
    capacity: usize,
    packets: Mutex<Vec<(NodeRid, P)>>,
}

impl<P: Send + 'static> PeerPacketHandler for Inbound<P> {
    fn handle(&self, data: Bytes, sender: &NodeRid) {
        trace!(chain_id = self.chain_id, peer = %sender.short_hex(), len = data.len(), "Received packet");
        let packet = match self.codec.decode(sender, &data) {
            Ok(packet) => packet,
            Err(DecodeError::BadMessage(reason)) => {
                info!(chain_id = self.chain_id, peer = %sender.short_hex(), %reason, "Bad message received");
                return;
            }
            Err(err) => {
                error!(chain_id = self.chain_id, peer = %sender.short_hex(), error = %err, "Failed to decode packet");
                return;
            }
        };

        let mut packets = self.packets.lock();
        if packets.len() >= self.capacity {
            warn!(chain_id = self.chain_id, peer = %sender.short_hex(), "Inbound queue full, packet dropped");
            return;
        }
        packets.push((sender.clone(), packet));
    }
}

/// Typed packet exchange for one chain
pub struct CommunicationManager<P> {
    connection_manager: Arc<ConnectionManager>,
    chain_id: ChainId,
    blockchain_rid: BlockchainRid,
    role: ChainRole,
    nodes: Arc<NetworkNodes>,
    quality: Option<Arc<dyn PeerQualityPolicy>>,
    codec: Arc<dyn PacketCodec<P>>,
    inbound: Arc<Inbound<P>>,
    connected: Mutex<bool>,
}

impl<P> CommunicationManager<P>
where
    P: Send + Sync + 'static,
{
    /// Create a manager for `chain_id`. Nothing is registered until [`init`](Self::init).
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        chain_id: ChainId,
        blockchain_rid: BlockchainRid,
        nodes: Arc<NetworkNodes>,
        codec: Arc<dyn PacketCodec<P>>,
    ) -> Self {
        let inbound = Arc::new(Inbound {
            chain_id,
            codec: codec.clone(),
            capacity: connection_manager.config().inbound_capacity,
            packets: Mutex::new(Vec::new()),
        });
        Self {
            connection_manager,
            chain_id,
            blockchain_rid,
            role: ChainRole::Signer,
            nodes,
            quality: None,
            codec,
            inbound,
            connected: Mutex::new(false),
        }
    }

    /// Set the chain role
    pub fn with_role(mut self, role: ChainRole) -> Self {
        self.role = role;
        self
    }

    /// Replace the default peer-quality policy
    pub fn with_quality_policy(mut self, quality: Arc<dyn PeerQualityPolicy>) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Local chain id
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Global chain id
    pub fn blockchain_rid(&self) -> BlockchainRid {
        self.blockchain_rid
    }

    /// Register the chain with the connection manager. Idempotent.
    pub fn init(&self) -> NetworkResult<()> {
        let mut connected = self.connected.lock();
        if *connected {
            return Ok(());
        }
        let handler: Arc<dyn PeerPacketHandler> = self.inbound.clone();
        let mut config = ChainPeersConfig::new(self.chain_id, self.blockchain_rid, self.nodes.clone(), handler)
            .with_role(self.role);
        if let Some(quality) = &self.quality {
            config = config.with_quality_policy(quality.clone());
        }
        self.connection_manager
            .connect_chain(config, self.role.connects_to_all())?;
        *connected = true;
        Ok(())
    }

    /// Take every packet received since the last call
    pub fn get_packets(&self) -> Vec<(NodeRid, P)> {
        std::mem::take(&mut *self.inbound.packets.lock())
    }

    /// Send to one peer. Sending to ourselves is an error.
    pub fn send_packet(&self, packet: P, recipient: &NodeRid) -> NetworkResult<()> {
        if *recipient == self.nodes.myself().node_rid {
            return Err(NetworkError::SendToSelf);
        }
        trace!(chain_id = self.chain_id, peer = %recipient.short_hex(), "Sending packet");
        self.connection_manager
            .send_packet(self.lazy(packet), self.chain_id, recipient)
    }

    /// Send to every connected peer. The packet is encoded at most once.
    pub fn broadcast_packet(&self, packet: P) -> NetworkResult<()> {
        trace!(chain_id = self.chain_id, "Broadcasting packet");
        self.connection_manager
            .broadcast_packet(self.lazy(packet), self.chain_id)
    }

    /// Send to a random connected node from `among_peers`.
    ///
    /// Returns the chosen node, or `None` when none of them is connected.
    pub fn send_to_random_peer(&self, packet: P, among_peers: &[NodeRid]) -> Option<NodeRid> {
        let candidates: Vec<NodeRid> = self
            .connection_manager
            .get_connected_nodes(self.chain_id)
            .into_iter()
            .filter(|node| among_peers.contains(node))
            .collect();
        let peer = candidates.choose(&mut rand::thread_rng())?.clone();
        match self.send_packet(packet, &peer) {
            Ok(()) => Some(peer),
            Err(err) => {
                error!(chain_id = self.chain_id, peer = %peer.short_hex(), error = %err, "Could not send packet to random peer");
                None
            }
        }
    }

    /// Unregister the chain. Idempotent.
    pub fn shutdown(&self) {
        let mut connected = self.connected.lock();
        if !*connected {
            return;
        }
        if let Err(err) = self.connection_manager.disconnect_chain(self.chain_id) {
            debug!(chain_id = self.chain_id, error = %err, "Disconnect on shutdown failed");
        }
        *connected = false;
    }

    fn lazy(&self, packet: P) -> LazyPacket {
        let codec = self.codec.clone();
        let encoded = OnceLock::new();
        Arc::new(move || encoded.get_or_init(|| codec.encode(&packet)).clone())
    }
}
