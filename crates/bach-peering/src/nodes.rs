//! Node directory for a network
//!
//! Nodes are either configured peers (signers) or read-only nodes that only
//! want to follow a chain. Read-only nodes need not be known in advance, so
//! they are counted and refused once they contact us too often.

use crate::connector::PeerQualityPolicy;
use crate::error::{NetworkError, NetworkResult};
use crate::types::PeerInfo;
use bach_primitives::NodeRid;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Contacts a read-only node may make per day
pub const MAX_DAILY_REQUESTS: u32 = 1000;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct ReadOnlyContacts {
    hits: HashMap<NodeRid, u32>,
    next_reset: Option<Instant>,
}

/// The local node plus every other configured peer
pub struct NetworkNodes {
    myself: PeerInfo,
    peers: HashMap<NodeRid, PeerInfo>,
    read_only: Mutex<ReadOnlyContacts>,
}

impl NetworkNodes {
    /// Create from our own info and the other peers (`peers` must not contain us)
    pub fn new(myself: PeerInfo, peers: impl IntoIterator<Item = PeerInfo>) -> Self {
        let peers = peers
            .into_iter()
            .filter(|p| p.node_rid != myself.node_rid)
            .map(|p| (p.node_rid.clone(), p))
            .collect();
        Self {
            myself,
            peers,
            read_only: Mutex::new(ReadOnlyContacts::default()),
        }
    }

    /// Build from the full peer list of a network, locating ourselves by key
    pub fn build(peers: impl IntoIterator<Item = PeerInfo>, my_key: &NodeRid) -> NetworkResult<Self> {
        let peers: Vec<PeerInfo> = peers.into_iter().collect();
        if peers.is_empty() {
            return Err(NetworkError::InvalidConfig(
                "no peers have been configured for the network".into(),
            ));
        }
        let myself = peers
            .iter()
            .find(|p| &p.node_rid == my_key)
            .cloned()
            .ok_or_else(|| {
                NetworkError::InvalidConfig(format!(
                    "our node id {} is not in the list of peers",
                    my_key
                ))
            })?;
        Ok(Self::new(myself, peers))
    }

    /// Our own peer info
    pub fn myself(&self) -> &PeerInfo {
        &self.myself
    }

    /// Check if any other peer is configured
    pub fn has_peers(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Ids of all other configured peers
    pub fn peer_ids(&self) -> BTreeSet<NodeRid> {
        self.peers.keys().cloned().collect()
    }

    /// Look up a configured peer
    pub fn resolve_peer(&self, node: &NodeRid) -> Option<&PeerInfo> {
        self.peers.get(node)
    }

    /// Check if `node` is a configured peer
    pub fn is_peer(&self, node: &NodeRid) -> bool {
        self.peers.contains_key(node)
    }
}

impl PeerQualityPolicy for NetworkNodes {
    fn is_node_behaving_well(&self, node: &NodeRid, now: Instant) -> bool {
        let mut contacts = self.read_only.lock();

        if contacts.next_reset.map_or(true, |reset| now > reset) {
            if !contacts.hits.is_empty() {
                let total: u64 = contacts.hits.values().map(|h| u64::from(*h)).sum();
                info!(
                    "Clearing read-only node counters: {} nodes made {} contacts",
                    contacts.hits.len(),
                    total
                );
            }
            contacts.hits.clear();
            contacts.next_reset = Some(now + DAY);
        }

        // Only read-only nodes are limited
        if self.peers.contains_key(node) {
            return true;
        }

        let hits = contacts.hits.entry(node.clone()).or_insert(0);
        *hits = hits.saturating_add(1);
        if *hits > MAX_DAILY_REQUESTS {
            if *hits == MAX_DAILY_REQUESTS + 1 {
                debug!("Blocking read-only node {} for a day", node.short_hex());
            }
            return false;
        }
        true
    }
}
