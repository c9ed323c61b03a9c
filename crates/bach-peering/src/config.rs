//! Peering configuration

use crate::connector::{PeerPacketHandler, PeerQualityPolicy};
use crate::error::{NetworkError, NetworkResult};
use crate::nodes::NetworkNodes;
use bach_primitives::{BlockchainRid, ChainId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Timing and buffering settings shared by all chains of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeeringConfig {
    /// Lower bound of the backup connect pass delay (ms)
    pub backup_connect_min_ms: u64,
    /// Upper bound of the backup connect pass delay (ms)
    pub backup_connect_max_ms: u64,
    /// Lower bound of the first reconnect delay (ms)
    pub reconnect_min_ms: u64,
    /// Upper bound of the first reconnect delay (ms)
    pub reconnect_max_ms: u64,
    /// Reconnect delay cap (ms)
    pub max_reconnect_delay_ms: u64,
    /// How long shutdown waits for the timer thread (ms)
    pub shutdown_timeout_ms: u64,
    /// Undrained inbound packets kept per chain
    pub inbound_capacity: usize,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            backup_connect_min_ms: 1000,
            backup_connect_max_ms: 2000,
            reconnect_min_ms: 100,
            reconnect_max_ms: 1000,
            max_reconnect_delay_ms: 60_000,
            shutdown_timeout_ms: 2000,
            inbound_capacity: 1000,
        }
    }
}

impl PeeringConfig {
    /// Check window bounds and limits
    pub fn validate(&self) -> NetworkResult<()> {
        if self.backup_connect_min_ms > self.backup_connect_max_ms {
            return Err(NetworkError::InvalidConfig(format!(
                "backup connect window is inverted: {} > {}",
                self.backup_connect_min_ms, self.backup_connect_max_ms
            )));
        }
        if self.reconnect_min_ms > self.reconnect_max_ms {
            return Err(NetworkError::InvalidConfig(format!(
                "reconnect window is inverted: {} > {}",
                self.reconnect_min_ms, self.reconnect_max_ms
            )));
        }
        if self.reconnect_min_ms == 0 {
            return Err(NetworkError::InvalidConfig(
                "reconnect delay must be positive".into(),
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_max_ms {
            return Err(NetworkError::InvalidConfig(format!(
                "reconnect cap {} is below the reconnect window {}",
                self.max_reconnect_delay_ms, self.reconnect_max_ms
            )));
        }
        if self.inbound_capacity == 0 {
            return Err(NetworkError::InvalidConfig(
                "inbound capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Reconnect delay cap
    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    /// Shutdown wait bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// What part a node plays in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    /// Block-building signer
    Signer,
    /// Read-only follower
    Replica,
    /// Old chain kept for history, peers dialed on demand
    Historic,
}

impl ChainRole {
    /// Check if the chain wants a connection to every configured peer
    pub fn connects_to_all(&self) -> bool {
        matches!(self, ChainRole::Signer | ChainRole::Replica)
    }
}

/// Everything the connection manager needs to run one chain
#[derive(Clone)]
pub struct ChainPeersConfig {
    /// Local chain id
    pub chain_id: ChainId,
    /// Global chain id
    pub blockchain_rid: BlockchainRid,
    /// Our role in the chain
    pub role: ChainRole,
    /// Node directory
    pub nodes: Arc<NetworkNodes>,
    /// Admission policy for incoming links
    pub quality: Arc<dyn PeerQualityPolicy>,
    /// Where inbound packet bytes go
    pub packet_handler: Arc<dyn PeerPacketHandler>,
}

impl ChainPeersConfig {
    /// Create a signer chain config that uses the node directory as quality policy
    pub fn new(
        chain_id: ChainId,
        blockchain_rid: BlockchainRid,
        nodes: Arc<NetworkNodes>,
        packet_handler: Arc<dyn PeerPacketHandler>,
    ) -> Self {
        Self {
            chain_id,
            blockchain_rid,
            role: ChainRole::Signer,
            quality: nodes.clone(),
            nodes,
            packet_handler,
        }
    }

    /// Set the role
    pub fn with_role(mut self, role: ChainRole) -> Self {
        self.role = role;
        self
    }

    /// Replace the quality policy
    pub fn with_quality_policy(mut self, quality: Arc<dyn PeerQualityPolicy>) -> Self {
        self.quality = quality;
        self
    }
}

impl fmt::Debug for ChainPeersConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainPeersConfig")
            .field("chain_id", &self.chain_id)
            .field("blockchain_rid", &self.blockchain_rid)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
