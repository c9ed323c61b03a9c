//! Simulated mesh of nodes and chains

use crate::codec::{Heartbeat, HeartbeatCodec};
use crate::config::SimConfig;
use anyhow::{bail, Context, Result};
use bach_peering::{CommunicationManager, ConnectionManager, LocalNetwork, NetworkNodes, PeerInfo};
use bach_primitives::{BlockchainRid, ChainId, NodeRid};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Largest mesh the simulator builds
pub const MAX_NODES: usize = 255;

struct SimNode {
    id: NodeRid,
    manager: Arc<ConnectionManager>,
    chains: Vec<CommunicationManager<Heartbeat>>,
    received: BTreeMap<ChainId, u64>,
}

/// What each node saw
#[derive(Debug, Serialize)]
pub struct NodeReport {
    /// Node id
    pub node: String,
    /// Blockchain rid → peer → "in"/"out"
    pub topology: BTreeMap<String, BTreeMap<String, String>>,
    /// Heartbeats received per chain
    pub received: BTreeMap<ChainId, u64>,
}

/// Outcome of a run
#[derive(Debug, Serialize)]
pub struct Report {
    /// Every node has a link to every other node on every chain
    pub converged: bool,
    /// Per-node details
    pub nodes: Vec<NodeReport>,
}

/// N nodes × M chains on one [`LocalNetwork`]
pub struct Simulation {
    config: SimConfig,
    chain_ids: Vec<ChainId>,
    nodes: Vec<SimNode>,
}

/// Simulated node ids look like compressed public keys
fn node_id(index: usize) -> Result<NodeRid> {
    let mut bytes = vec![0x02; 33];
    bytes[32] = index as u8;
    Ok(NodeRid::new(bytes)?)
}

fn chain_rid(chain_id: ChainId) -> BlockchainRid {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&chain_id.to_be_bytes());
    BlockchainRid::from_bytes(bytes)
}

impl Simulation {
    /// Start every node and register every chain
    pub fn start(config: SimConfig, node_count: usize, chain_count: usize) -> Result<Self> {
        if !(2..=MAX_NODES).contains(&node_count) {
            bail!("node count must be between 2 and {}, got {}", MAX_NODES, node_count);
        }
        if chain_count == 0 {
            bail!("at least one chain is required");
        }
        config.validate()?;

        let network = LocalNetwork::new(Handle::current());
        let peers = (1..=node_count)
            .map(|i| {
                let port = config.base_port.saturating_add(i as u16);
                Ok(PeerInfo::new(config.host.clone(), port, node_id(i)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let chain_ids: Vec<ChainId> = (1..=chain_count as ChainId).collect();

        let mut nodes = Vec::with_capacity(node_count);
        for me in &peers {
            let manager = ConnectionManager::new(me.clone(), &network.factory(), config.peering.clone())
                .with_context(|| format!("starting node {}", me.node_rid))?;
            let directory = Arc::new(NetworkNodes::build(peers.iter().cloned(), &me.node_rid)?);

            let mut chains = Vec::with_capacity(chain_count);
            for chain_id in &chain_ids {
                let comm = CommunicationManager::new(
                    manager.clone(),
                    *chain_id,
                    chain_rid(*chain_id),
                    directory.clone(),
                    Arc::new(HeartbeatCodec),
                );
                comm.init()?;
                chains.push(comm);
            }
            nodes.push(SimNode {
                id: me.node_rid.clone(),
                manager,
                chains,
                received: chain_ids.iter().map(|id| (*id, 0)).collect(),
            });
        }
        info!(nodes = node_count, chains = chain_count, "Simulation started");

        Ok(Self {
            config,
            chain_ids,
            nodes,
        })
    }

    /// Broadcast heartbeats for `duration`, then wait for the mesh to settle
    pub async fn run(&mut self, duration: Duration, restart_chain: Option<ChainId>) -> Result<()> {
        if let Some(chain_id) = restart_chain {
            if !self.chain_ids.contains(&chain_id) {
                bail!("cannot restart unknown chain {}", chain_id);
            }
        }

        let start = Instant::now();
        let mut pending_restart = restart_chain;
        let mut seq = 0u64;
        while start.elapsed() < duration {
            tokio::time::sleep(self.config.tick()).await;
            seq += 1;
            self.exchange(seq);

            if start.elapsed() >= duration / 2 {
                if let Some(chain_id) = pending_restart.take() {
                    self.restart_chain(chain_id)?;
                }
            }
        }

        let settle_until = Instant::now() + self.config.settle();
        while !self.is_converged() && Instant::now() < settle_until {
            tokio::time::sleep(self.config.tick()).await;
        }
        self.collect();
        Ok(())
    }

    fn exchange(&mut self, seq: u64) {
        for node in &mut self.nodes {
            for comm in &node.chains {
                if let Err(err) = comm.broadcast_packet(Heartbeat { seq }) {
                    warn!(node = %node.id.short_hex(), chain_id = comm.chain_id(), error = %err, "Broadcast failed");
                }
                let count = comm.get_packets().len() as u64;
                *node.received.entry(comm.chain_id()).or_default() += count;
            }
        }
    }

    fn collect(&mut self) {
        for node in &mut self.nodes {
            for comm in &node.chains {
                let count = comm.get_packets().len() as u64;
                *node.received.entry(comm.chain_id()).or_default() += count;
            }
        }
    }

    fn restart_chain(&self, chain_id: ChainId) -> Result<()> {
        let node = &self.nodes[0];
        let comm = node
            .chains
            .iter()
            .find(|c| c.chain_id() == chain_id)
            .with_context(|| format!("chain {} not running", chain_id))?;
        info!(node = %node.id.short_hex(), chain_id, "Restarting chain");
        comm.shutdown();
        comm.init()?;
        Ok(())
    }

    /// Check if every node is linked to every other node on every chain
    pub fn is_converged(&self) -> bool {
        let expected = self.nodes.len() - 1;
        self.nodes.iter().all(|node| {
            self.chain_ids
                .iter()
                .all(|chain_id| node.manager.get_connected_nodes(*chain_id).len() == expected)
        })
    }

    /// Per-node topology and heartbeat counts
    pub fn report(&self) -> Report {
        Report {
            converged: self.is_converged(),
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeReport {
                    node: node.id.to_hex(),
                    topology: node.manager.get_nodes_topology(),
                    received: node.received.clone(),
                })
                .collect(),
        }
    }

    /// Stop every node
    pub fn shutdown(&self) {
        for node in &self.nodes {
            for comm in &node.chains {
                comm.shutdown();
            }
            node.manager.shutdown();
        }
        info!("Simulation stopped");
    }
}
