//! Connections of a single chain

use crate::config::ChainPeersConfig;
use crate::connector::{Connection, PeerPacketHandler};
use crate::types::ConnectionDirection;
use bach_primitives::{BlockchainRid, ChainId, NodeRid};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// The node → connection map of one chain.
///
/// Holds at most one connection per remote node.
pub struct ChainConnectionSet {
    config: ChainPeersConfig,
    connect_all: bool,
    connections: HashMap<NodeRid, Arc<dyn Connection>>,
}

impl ChainConnectionSet {
    /// Create an empty set
    pub fn new(config: ChainPeersConfig, connect_all: bool) -> Self {
        Self {
            config,
            connect_all,
            connections: HashMap::new(),
        }
    }

    /// Local chain id
    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    /// Global chain id
    pub fn blockchain_rid(&self) -> BlockchainRid {
        self.config.blockchain_rid
    }

    /// Chain configuration
    pub fn config(&self) -> &ChainPeersConfig {
        &self.config
    }

    /// Check if lost connections should be re-established
    pub fn should_connect_all(&self) -> bool {
        self.connect_all
    }

    /// Handler for inbound packets of this chain
    pub fn packet_handler(&self) -> Arc<dyn PeerPacketHandler> {
        self.config.packet_handler.clone()
    }

    /// Ask the chain's quality policy about `node`
    pub fn is_node_behaving_well(&self, node: &NodeRid) -> bool {
        self.config.quality.is_node_behaving_well(node, Instant::now())
    }

    /// Check if `node` has a connection
    pub fn is_connected(&self, node: &NodeRid) -> bool {
        self.connections.contains_key(node)
    }

    /// Connection to `node`
    pub fn get_connection(&self, node: &NodeRid) -> Option<&Arc<dyn Connection>> {
        self.connections.get(node)
    }

    /// Install a connection, returning the one it displaced
    pub fn set_connection(&mut self, node: NodeRid, connection: Arc<dyn Connection>) -> Option<Arc<dyn Connection>> {
        self.connections.insert(node, connection)
    }

    /// Detach and close the connection to `node`
    pub fn remove_and_close_connection(&mut self, node: &NodeRid) -> bool {
        match self.connections.remove(node) {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Remote nodes with a connection
    pub fn connected_nodes(&self) -> Vec<NodeRid> {
        self.connections.keys().cloned().collect()
    }

    /// All live connections
    pub fn connections(&self) -> impl Iterator<Item = &Arc<dyn Connection>> {
        self.connections.values()
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close and forget every connection
    pub fn close_connections(&mut self) {
        for (_, connection) in self.connections.drain() {
            connection.close();
        }
    }

    /// Direction of each live connection
    pub fn topology(&self) -> BTreeMap<NodeRid, ConnectionDirection> {
        self.connections
            .iter()
            .map(|(node, conn)| (node.clone(), conn.descriptor().direction))
            .collect()
    }
}
