//! Test doubles shared by the unit tests

use crate::config::ChainPeersConfig;
use crate::connector::{Connection, ConnectorFactory, NodeConnector, NodeConnectorEvents, PeerPacketHandler};
use crate::error::{NetworkError, NetworkResult};
use crate::nodes::NetworkNodes;
use crate::strategy::PeerConnectionManager;
use crate::types::{ConnectionDescriptor, ConnectionDirection, LazyPacket, PeerInfo};
use bach_primitives::{BlockchainRid, ChainId, NodeRid};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub(crate) fn node(byte: u8) -> NodeRid {
    NodeRid::new(vec![byte]).unwrap()
}

pub(crate) fn peer_info(byte: u8) -> PeerInfo {
    PeerInfo::new("127.0.0.1", 9000 + byte as u16, node(byte))
}

pub(crate) fn nodes(me: u8, peers: &[u8]) -> Arc<NetworkNodes> {
    Arc::new(NetworkNodes::new(
        peer_info(me),
        peers.iter().map(|b| peer_info(*b)),
    ))
}

pub(crate) fn chain_config(chain_id: ChainId, rid: BlockchainRid, me: u8, peers: &[u8]) -> ChainPeersConfig {
    let handler: Arc<dyn PeerPacketHandler> = Arc::new(|_: Bytes, _: &NodeRid| {});
    ChainPeersConfig::new(chain_id, rid, nodes(me, peers), handler)
}

/// Poll `cond` until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub(crate) struct MockConnection {
    descriptor: ConnectionDescriptor,
    closed: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
}

impl MockConnection {
    pub(crate) fn new(descriptor: ConnectionDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn incoming(rid: BlockchainRid, remote: NodeRid) -> Arc<Self> {
        Self::new(ConnectionDescriptor::new(rid, remote, ConnectionDirection::Incoming))
    }

    pub(crate) fn outgoing(rid: BlockchainRid, remote: NodeRid) -> Arc<Self> {
        Self::new(ConnectionDescriptor::new(rid, remote, ConnectionDirection::Outgoing))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }
}

impl Connection for MockConnection {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn send_packet(&self, packet: LazyPacket) {
        self.sent.lock().push(packet());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Records dials instead of making them
#[derive(Default)]
pub(crate) struct MockConnector {
    pub(crate) dials: Mutex<Vec<ConnectionDescriptor>>,
    pub(crate) shut_down: AtomicBool,
}

impl MockConnector {
    pub(crate) fn dialed(&self, remote: &NodeRid) -> usize {
        self.dials.lock().iter().filter(|d| &d.node_rid == remote).count()
    }
}

impl NodeConnector for MockConnector {
    fn connect_node(&self, descriptor: ConnectionDescriptor, _peer: &PeerInfo) {
        self.dials.lock().push(descriptor);
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct MockConnectorFactory {
    pub(crate) connector: Arc<MockConnector>,
    pub(crate) events: Mutex<Option<Weak<dyn NodeConnectorEvents>>>,
}

impl MockConnectorFactory {
    pub(crate) fn new() -> Self {
        Self {
            connector: Arc::new(MockConnector::default()),
            events: Mutex::new(None),
        }
    }
}

impl ConnectorFactory for MockConnectorFactory {
    fn create(&self, _me: &PeerInfo, events: Weak<dyn NodeConnectorEvents>) -> Arc<dyn NodeConnector> {
        *self.events.lock() = Some(events);
        self.connector.clone()
    }
}

/// Stand-in for the connection manager as seen by the strategy
#[derive(Default)]
pub(crate) struct RecordingPeers {
    pub(crate) connected: Mutex<HashSet<NodeRid>>,
    pub(crate) dials: Mutex<Vec<(ChainId, NodeRid)>>,
    pub(crate) unknown_chain: AtomicBool,
}

impl RecordingPeers {
    pub(crate) fn dialed(&self, peer: &NodeRid) -> usize {
        self.dials.lock().iter().filter(|(_, p)| p == peer).count()
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dials.lock().len()
    }
}

impl PeerConnectionManager for RecordingPeers {
    fn connect_chain_peer(&self, chain_id: ChainId, peer: &NodeRid) -> NetworkResult<()> {
        if self.unknown_chain.load(Ordering::SeqCst) {
            return Err(NetworkError::UnknownChain(chain_id));
        }
        self.dials.lock().push((chain_id, peer.clone()));
        Ok(())
    }

    fn is_peer_connected(&self, _chain_id: ChainId, peer: &NodeRid) -> bool {
        self.connected.lock().contains(peer)
    }

    fn get_connected_nodes(&self, _chain_id: ChainId) -> Vec<NodeRid> {
        self.connected.lock().iter().cloned().collect()
    }
}
