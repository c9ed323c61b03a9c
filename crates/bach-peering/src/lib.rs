//! # bach-peering
//!
//! Multi-chain peer connection management for BachLedger.
//!
//! A node runs many chains. Each chain keeps its own authenticated link to
//! every peer, so a chain can restart without disturbing the others. This
//! crate provides:
//! - Connection bookkeeping per chain, with blockchain rid ↔ chain id translation
//! - Deterministic dialing and duplicate connection tie-break
//! - Reconnection with per-peer exponential backoff
//! - Typed per-chain packet exchange on top of raw links
//! - An in-process transport for tests and simulation
//!
//! ## Architecture
//!
//! ```text
//! +------------------------+   +------------------------+
//! | CommunicationManager<P>|   | CommunicationManager<P>|  <- one per chain
//! +------------------------+   +------------------------+
//!             |                            |
//! +---------------------------------------------------+
//! |                 ConnectionManager                  |  <- single lock
//! |  +--------------------+  +---------------------+  |
//! |  | ConnectionRegistry |  | ConnectionStrategy  |  |
//! |  +--------------------+  +---------------------+  |
//! +---------------------------------------------------+
//!             |           ^
//!    connect_node    on_node_connected / on_node_disconnected
//!             v           |
//! +---------------------------------------------------+
//! |        NodeConnector (transport, e.g. local)      |
//! +---------------------------------------------------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use bach_peering::{CommunicationManager, ConnectionManager, LocalNetwork, PeeringConfig};
//!
//! let network = LocalNetwork::new(tokio::runtime::Handle::current());
//! let manager = ConnectionManager::new(me, &network.factory(), PeeringConfig::default())?;
//!
//! let comm = CommunicationManager::new(manager.clone(), chain_id, blockchain_rid, nodes, codec);
//! comm.init()?;
//!
//! comm.broadcast_packet(packet)?;
//! for (sender, packet) in comm.get_packets() {
//!     // hand over to consensus
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backoff;
mod chain;
mod communication;
mod config;
mod connector;
mod error;
mod local;
mod manager;
mod nodes;
mod registry;
mod strategy;
mod timer;
mod types;

#[cfg(test)]
mod test_util;

pub use backoff::ExponentialDelay;
pub use chain::ChainConnectionSet;
pub use communication::CommunicationManager;
pub use config::{ChainPeersConfig, ChainRole, PeeringConfig};
pub use connector::{
    same_connection, Connection, ConnectorFactory, NodeConnector, NodeConnectorEvents, PacketCodec,
    PeerPacketHandler, PeerQualityPolicy,
};
pub use error::{DecodeError, NetworkError, NetworkResult, Rejection};
pub use local::{LocalConnection, LocalConnector, LocalConnectorFactory, LocalNetwork};
pub use manager::ConnectionManager;
pub use nodes::{NetworkNodes, MAX_DAILY_REQUESTS};
pub use registry::ConnectionRegistry;
pub use strategy::{ConnectionStrategy, PeerConnectionManager};
pub use types::{ConnectionDescriptor, ConnectionDirection, LazyPacket, PeerInfo};
