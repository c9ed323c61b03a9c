//! All chains and their connections
//!
//! Other nodes talk about chains by [`BlockchainRid`], while inside the node
//! the shorter [`ChainId`] is used. The registry keeps the translation in
//! both directions, plus a history of rids whose chain has been disconnected
//! so that late callbacks for a removed chain can still be attributed.

use crate::chain::ChainConnectionSet;
use crate::connector::Connection;
use crate::error::{NetworkError, NetworkResult};
use crate::types::ConnectionDirection;
use bach_primitives::{BlockchainRid, ChainId, NodeRid};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Collection of every registered chain.
///
/// Not synchronized; the connection manager keeps it behind its lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    chains: HashMap<ChainId, ChainConnectionSet>,
    chain_id_for_rid: HashMap<BlockchainRid, ChainId>,
    // Never pruned
    disconnected_chain_id_for_rid: HashMap<BlockchainRid, ChainId>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain
    pub fn add(&mut self, set: ChainConnectionSet) -> NetworkResult<()> {
        let chain_id = set.chain_id();
        let rid = set.blockchain_rid();
        if self.chains.contains_key(&chain_id) {
            return Err(NetworkError::AlreadyConnected(chain_id));
        }
        match self.chain_id_for_rid.get(&rid) {
            Some(existing) if *existing != chain_id => {
                return Err(NetworkError::BlockchainRidInUse {
                    rid,
                    existing: *existing,
                    requested: chain_id,
                });
            }
            _ => {}
        }
        self.chain_id_for_rid.insert(rid, chain_id);
        self.chains.insert(chain_id, set);
        Ok(())
    }

    /// Check if a chain is registered
    pub fn has_chain(&self, chain_id: ChainId) -> bool {
        self.chains.contains_key(&chain_id)
    }

    /// Look up a chain
    pub fn get(&self, chain_id: ChainId) -> Option<&ChainConnectionSet> {
        self.chains.get(&chain_id)
    }

    /// Look up a chain for mutation
    pub fn get_mut(&mut self, chain_id: ChainId) -> Option<&mut ChainConnectionSet> {
        self.chains.get_mut(&chain_id)
    }

    /// Look up a chain that must exist
    pub fn get_or_err(&self, chain_id: ChainId) -> NetworkResult<&ChainConnectionSet> {
        self.chains
            .get(&chain_id)
            .ok_or(NetworkError::UnknownChain(chain_id))
    }

    /// Look up a chain that must exist, for mutation
    pub fn get_mut_or_err(&mut self, chain_id: ChainId) -> NetworkResult<&mut ChainConnectionSet> {
        self.chains
            .get_mut(&chain_id)
            .ok_or(NetworkError::UnknownChain(chain_id))
    }

    /// Detach a chain. Its rid moves to the disconnected history; the caller
    /// closes the returned connections.
    pub fn remove(&mut self, chain_id: ChainId) -> Option<ChainConnectionSet> {
        let set = self.chains.remove(&chain_id)?;
        let rid = set.blockchain_rid();
        if let Some(old) = self.chain_id_for_rid.remove(&rid) {
            self.disconnected_chain_id_for_rid.insert(rid, old);
        }
        Some(set)
    }

    /// Detach every chain
    pub fn remove_all(&mut self) -> Vec<ChainConnectionSet> {
        let ids: Vec<ChainId> = self.chains.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Translate the rid of a newly connected link.
    ///
    /// Incoming links may fall back to the disconnected history; for our own
    /// outgoing dials only an active chain counts.
    pub fn resolve_chain_id(&self, rid: &BlockchainRid, direction: ConnectionDirection) -> Option<ChainId> {
        if let Some(id) = self.chain_id_for_rid.get(rid) {
            return Some(*id);
        }
        match direction {
            ConnectionDirection::Incoming => self.disconnected_chain_id_for_rid.get(rid).copied(),
            ConnectionDirection::Outgoing => None,
        }
    }

    /// Translate the rid of a link that went down, history included
    pub fn resolve_chain_id_on_disconnect(&self, rid: &BlockchainRid) -> Option<ChainId> {
        self.chain_id_for_rid
            .get(rid)
            .or_else(|| self.disconnected_chain_id_for_rid.get(rid))
            .copied()
    }

    /// Connection of `node` in `chain_id`
    pub fn get_node_connection(&self, chain_id: ChainId, node: &NodeRid) -> Option<&Arc<dyn Connection>> {
        self.chains.get(&chain_id)?.get_connection(node)
    }

    /// Ids of registered chains
    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.keys().copied().collect()
    }

    /// One-line summary for log lines
    pub fn stats(&self) -> String {
        let connections: usize = self.chains.values().map(|c| c.connection_count()).sum();
        format!("chains: {}, connections: {}", self.chains.len(), connections)
    }

    /// Rid hex → node hex → direction, for every chain
    pub fn nodes_topology(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.chains
            .values()
            .map(|chain| (chain.blockchain_rid().to_hex(), Self::chain_topology(chain)))
            .collect()
    }

    /// Node hex → direction for one chain
    pub fn chain_nodes_topology(&self, chain_id: ChainId) -> BTreeMap<String, String> {
        self.chains
            .get(&chain_id)
            .map(Self::chain_topology)
            .unwrap_or_default()
    }

    fn chain_topology(chain: &ChainConnectionSet) -> BTreeMap<String, String> {
        chain
            .topology()
            .into_iter()
            .map(|(node, dir)| (node.to_hex(), dir.to_string()))
            .collect()
    }
}
