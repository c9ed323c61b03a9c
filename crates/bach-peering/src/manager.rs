//! Connection manager
//!
//! Owns every connection of every chain this node runs. Other nodes name a
//! chain by its [`BlockchainRid`], which is unique everywhere; inside the node
//! the short [`ChainId`] is used and never leaves the process.
//!
//! All state sits behind one lock. Every public call and every transport
//! callback holds it for its whole duration, which also serializes the
//! duplicate connection tie-break. Transport callbacks arrive on transport
//! threads; strategy timers arrive on the strategy's timer thread.

use crate::chain::ChainConnectionSet;
use crate::config::{ChainPeersConfig, PeeringConfig};
use crate::connector::{
    same_connection, Connection, ConnectorFactory, NodeConnector, NodeConnectorEvents, PeerPacketHandler,
};
use crate::error::{NetworkError, NetworkResult, Rejection};
use crate::registry::ConnectionRegistry;
use crate::strategy::{ConnectionStrategy, PeerConnectionManager};
use crate::timer::TimerQueue;
use crate::types::{ConnectionDescriptor, ConnectionDirection, LazyPacket, PeerInfo};
use bach_primitives::{ChainId, NodeRid};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, field, info, info_span, trace, Span};

struct ManagerState {
    registry: ConnectionRegistry,
    is_shut_down: bool,
}

impl ManagerState {
    fn check_running(&self) -> NetworkResult<()> {
        if self.is_shut_down {
            Err(NetworkError::AlreadyShutDown)
        } else {
            Ok(())
        }
    }
}

/// Multi-chain connection manager
pub struct ConnectionManager {
    me: PeerInfo,
    config: PeeringConfig,
    state: Mutex<ManagerState>,
    connector: Arc<dyn NodeConnector>,
    strategy: ConnectionStrategy,
}

impl ConnectionManager {
    /// Create a manager and its transport connector
    pub fn new(me: PeerInfo, factory: &dyn ConnectorFactory, config: PeeringConfig) -> NetworkResult<Arc<Self>> {
        config.validate()?;
        let timers = TimerQueue::new("peering-timer")?;
        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let events: Weak<dyn NodeConnectorEvents> = weak.clone();
            let peers: Weak<dyn PeerConnectionManager> = weak.clone();
            let connector = factory.create(&me, events);
            let strategy = ConnectionStrategy::with_timers(me.node_rid.clone(), config.clone(), timers, peers);
            info!(me = %me.node_rid.short_hex(), host = %me.host, port = me.port, "Connection manager created");
            Self {
                me,
                config,
                state: Mutex::new(ManagerState {
                    registry: ConnectionRegistry::new(),
                    is_shut_down: false,
                }),
                connector,
                strategy,
            }
        }))
    }

    /// The local node
    pub fn me(&self) -> &PeerInfo {
        &self.me
    }

    /// Peering settings
    pub fn config(&self) -> &PeeringConfig {
        &self.config
    }

    /// Register a chain and, for connect-all chains, start dialing its peers
    pub fn connect_chain(&self, config: ChainPeersConfig, auto_connect_all: bool) -> NetworkResult<()> {
        let chain_id = config.chain_id;
        let blockchain_rid = config.blockchain_rid;
        let _span = info_span!("connect_chain", blockchain_rid = %blockchain_rid.short_hex(), chain_id).entered();
        debug!("Connecting chain");

        let mut state = self.state.lock();
        state.check_running()?;
        let peer_ids = config.nodes.peer_ids();
        state
            .registry
            .add(ChainConnectionSet::new(config, auto_connect_all))?;

        if auto_connect_all {
            let view = LockedManager::new(&state.registry, self.connector.as_ref());
            self.strategy.connect_all(&view, chain_id, blockchain_rid, peer_ids);
        }
        info!(connect_all = auto_connect_all, "Chain connected");
        Ok(())
    }

    /// Unregister a chain and close its connections.
    ///
    /// Unknown chains are ignored. After [`shutdown`](Self::shutdown) every
    /// chain is already gone, so this is a no-op too.
    pub fn disconnect_chain(&self, chain_id: ChainId) -> NetworkResult<()> {
        let mut state = self.state.lock();
        if state.is_shut_down {
            debug!(chain_id, "Manager shut down, chain already disconnected");
            return Ok(());
        }
        match state.registry.remove(chain_id) {
            Some(mut chain) => {
                let _span = info_span!(
                    "disconnect_chain",
                    blockchain_rid = %chain.blockchain_rid().short_hex(),
                    chain_id
                )
                .entered();
                chain.close_connections();
                self.strategy.chain_disconnected(chain_id);
                info!("Chain disconnected");
            }
            None => debug!(chain_id, "Disconnecting unknown chain, nothing to do"),
        }
        Ok(())
    }

    /// Dial `peer` for a registered chain. No-op when already connected.
    pub fn connect_chain_peer(&self, chain_id: ChainId, peer: &NodeRid) -> NetworkResult<()> {
        let state = self.state.lock();
        state.check_running()?;
        dial(&state.registry, self.connector.as_ref(), chain_id, peer)
    }

    /// Close the connection to `peer` for a registered chain
    pub fn disconnect_chain_peer(&self, chain_id: ChainId, peer: &NodeRid) -> NetworkResult<()> {
        let mut state = self.state.lock();
        state.check_running()?;
        let chain = state.registry.get_mut_or_err(chain_id)?;
        if !chain.remove_and_close_connection(peer) {
            debug!(chain_id, peer = %peer.short_hex(), "No connection to disconnect");
        }
        Ok(())
    }

    /// Send to one peer. Dropped when the peer is not connected.
    pub fn send_packet(&self, packet: LazyPacket, chain_id: ChainId, peer: &NodeRid) -> NetworkResult<()> {
        let state = self.state.lock();
        state.check_running()?;
        match state.registry.get_node_connection(chain_id, peer) {
            Some(connection) => connection.send_packet(packet),
            None => trace!(chain_id, peer = %peer.short_hex(), "Peer not connected, packet dropped"),
        }
        Ok(())
    }

    /// Send to every connected peer of a chain
    pub fn broadcast_packet(&self, packet: LazyPacket, chain_id: ChainId) -> NetworkResult<()> {
        let state = self.state.lock();
        state.check_running()?;
        for connection in state.registry.get_or_err(chain_id)?.connections() {
            connection.send_packet(packet.clone());
        }
        Ok(())
    }

    /// Check if `peer` has a connection for `chain_id`
    pub fn is_peer_connected(&self, chain_id: ChainId, peer: &NodeRid) -> bool {
        self.state.lock().registry.get_node_connection(chain_id, peer).is_some()
    }

    /// Peers with a connection for `chain_id`
    pub fn get_connected_nodes(&self, chain_id: ChainId) -> Vec<NodeRid> {
        connected_nodes(&self.state.lock().registry, chain_id)
    }

    /// Check if a chain is registered
    pub fn has_chain(&self, chain_id: ChainId) -> bool {
        self.state.lock().registry.has_chain(chain_id)
    }

    /// Blockchain rid hex → node hex → "in"/"out", for every chain
    pub fn get_nodes_topology(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.state.lock().registry.nodes_topology()
    }

    /// Node hex → "in"/"out" for one chain
    pub fn get_chain_nodes_topology(&self, chain_id: ChainId) -> BTreeMap<String, String> {
        self.state.lock().registry.chain_nodes_topology(chain_id)
    }

    /// Chain and connection counts
    pub fn stats(&self) -> String {
        self.state.lock().registry.stats()
    }

    /// Delay of the reconnect scheduled for `peer`, if it is backing off
    pub fn pending_reconnect_delay(&self, peer: &NodeRid) -> Option<Duration> {
        self.strategy.pending_reconnect_delay(peer)
    }

    /// Check if [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().is_shut_down
    }

    /// Stop the connector and the strategy, then close everything.
    ///
    /// Every later mutating call fails with [`NetworkError::AlreadyShutDown`].
    pub fn shutdown(&self) {
        if self.is_shut_down() {
            return;
        }
        self.connector.shutdown();
        self.strategy.shutdown();

        let mut state = self.state.lock();
        state.is_shut_down = true;
        for mut chain in state.registry.remove_all() {
            chain.close_connections();
        }
        info!(me = %self.me.node_rid.short_hex(), "Connection manager shut down");
    }

    fn accept(
        &self,
        state: &mut ManagerState,
        connection: &Arc<dyn Connection>,
    ) -> Result<Arc<dyn PeerPacketHandler>, Rejection> {
        let descriptor = connection.descriptor();
        let chain_id = state
            .registry
            .resolve_chain_id(&descriptor.blockchain_rid, descriptor.direction)
            .ok_or(match descriptor.direction {
                ConnectionDirection::Incoming => Rejection::UnknownBlockchain,
                ConnectionDirection::Outgoing => Rejection::LostOwnChain,
            })?;
        Span::current().record("chain_id", chain_id);

        let chain = state.registry.get_mut(chain_id).ok_or(match descriptor.direction {
            ConnectionDirection::Incoming => Rejection::ChainGone,
            ConnectionDirection::Outgoing => Rejection::LostOwnChain,
        })?;
        let node = &descriptor.node_rid;
        if !chain.is_node_behaving_well(node) {
            return Err(Rejection::Misbehaving);
        }

        match chain.get_connection(node).map(|c| c.descriptor().is_outgoing()) {
            None => {
                chain.set_connection(node.clone(), connection.clone());
                self.strategy
                    .connection_established(chain_id, descriptor.is_outgoing(), node);
                debug!("Connection accepted");
                Ok(chain.packet_handler())
            }
            Some(is_original_outgoing) => {
                debug!(original_outgoing = is_original_outgoing, "Peer already connected");
                if !self
                    .strategy
                    .duplicate_connection_detected(chain_id, is_original_outgoing, node)
                {
                    return Err(Rejection::DuplicateLost);
                }
                if let Some(original) = chain.set_connection(node.clone(), connection.clone()) {
                    original.close();
                }
                debug!("Connection replaced the original one");
                Ok(chain.packet_handler())
            }
        }
    }
}

impl NodeConnectorEvents for ConnectionManager {
    fn on_node_connected(&self, connection: Arc<dyn Connection>) -> Option<Arc<dyn PeerPacketHandler>> {
        let descriptor = connection.descriptor();
        let _span = info_span!(
            "node_connected",
            blockchain_rid = %descriptor.blockchain_rid.short_hex(),
            chain_id = field::Empty
        )
        .entered();

        let mut state = self.state.lock();
        info!(
            direction = %descriptor.direction,
            peer = %descriptor.node_rid.short_hex(),
            stats = %state.registry.stats(),
            "New connection"
        );
        if state.is_shut_down {
            debug!("Shut down, closing new connection");
            connection.close();
            return None;
        }

        match self.accept(&mut state, &connection) {
            Ok(handler) => Some(handler),
            Err(rejection) => {
                log_rejection(rejection, descriptor);
                connection.close();
                None
            }
        }
    }

    fn on_node_disconnected(&self, connection: Arc<dyn Connection>) {
        let descriptor = connection.descriptor();
        let _span = info_span!(
            "node_disconnected",
            blockchain_rid = %descriptor.blockchain_rid.short_hex(),
            chain_id = field::Empty
        )
        .entered();
        let peer = &descriptor.node_rid;

        let mut state = self.state.lock();
        if state.is_shut_down {
            connection.close();
            return;
        }

        let Some(chain_id) = state
            .registry
            .resolve_chain_id_on_disconnect(&descriptor.blockchain_rid)
        else {
            match descriptor.direction {
                ConnectionDirection::Incoming => info!(peer = %peer.short_hex(), "Chain id not found"),
                ConnectionDirection::Outgoing => {
                    error!(peer = %peer.short_hex(), "Disconnected from a chain we never knew")
                }
            }
            connection.close();
            return;
        };
        Span::current().record("chain_id", chain_id);

        let Some(chain) = state.registry.get_mut(chain_id) else {
            debug!(
                peer = %peer.short_hex(),
                direction = %descriptor.direction,
                "Chain gone, probably removed by disconnect_chain"
            );
            connection.close();
            return;
        };

        let stored_is_this = chain
            .get_connection(peer)
            .map(|stored| same_connection(stored, &connection));
        let lost = match stored_is_this {
            Some(true) => {
                debug!(peer = %peer.short_hex(), direction = %descriptor.direction, "Peer disconnected");
                chain.remove_and_close_connection(peer);
                true
            }
            Some(false) => {
                debug!(peer = %peer.short_hex(), "Stale connection closed, live one kept");
                connection.close();
                false
            }
            None => {
                connection.close();
                true
            }
        };

        if lost && chain.should_connect_all() {
            let blockchain_rid = chain.blockchain_rid();
            let view = LockedManager::new(&state.registry, self.connector.as_ref());
            self.strategy
                .connection_lost(&view, chain_id, blockchain_rid, peer, descriptor.is_outgoing());
        }
    }
}

impl PeerConnectionManager for ConnectionManager {
    fn connect_chain_peer(&self, chain_id: ChainId, peer: &NodeRid) -> NetworkResult<()> {
        ConnectionManager::connect_chain_peer(self, chain_id, peer)
    }

    fn is_peer_connected(&self, chain_id: ChainId, peer: &NodeRid) -> bool {
        ConnectionManager::is_peer_connected(self, chain_id, peer)
    }

    fn get_connected_nodes(&self, chain_id: ChainId) -> Vec<NodeRid> {
        ConnectionManager::get_connected_nodes(self, chain_id)
    }
}

/// Manager operations for code already holding the lock
struct LockedManager<'a> {
    registry: &'a ConnectionRegistry,
    connector: &'a dyn NodeConnector,
}

impl<'a> LockedManager<'a> {
    fn new(registry: &'a ConnectionRegistry, connector: &'a dyn NodeConnector) -> Self {
        Self { registry, connector }
    }
}

impl PeerConnectionManager for LockedManager<'_> {
    fn connect_chain_peer(&self, chain_id: ChainId, peer: &NodeRid) -> NetworkResult<()> {
        dial(self.registry, self.connector, chain_id, peer)
    }

    fn is_peer_connected(&self, chain_id: ChainId, peer: &NodeRid) -> bool {
        self.registry.get_node_connection(chain_id, peer).is_some()
    }

    fn get_connected_nodes(&self, chain_id: ChainId) -> Vec<NodeRid> {
        connected_nodes(self.registry, chain_id)
    }
}

fn dial(
    registry: &ConnectionRegistry,
    connector: &dyn NodeConnector,
    chain_id: ChainId,
    peer: &NodeRid,
) -> NetworkResult<()> {
    let chain = registry.get_or_err(chain_id)?;
    if chain.is_connected(peer) {
        debug!(chain_id, peer = %peer.short_hex(), "Already connected, nothing to do");
        return Ok(());
    }
    let peer_info = chain
        .config()
        .nodes
        .resolve_peer(peer)
        .ok_or_else(|| NetworkError::UnknownPeer(peer.clone()))?;

    info!(chain_id, peer = %peer.short_hex(), "Connecting chain peer");
    let descriptor = ConnectionDescriptor::new(chain.blockchain_rid(), peer.clone(), ConnectionDirection::Outgoing);
    connector.connect_node(descriptor, peer_info);
    Ok(())
}

fn connected_nodes(registry: &ConnectionRegistry, chain_id: ChainId) -> Vec<NodeRid> {
    registry
        .get(chain_id)
        .map(ChainConnectionSet::connected_nodes)
        .unwrap_or_default()
}

fn log_rejection(rejection: Rejection, descriptor: &ConnectionDescriptor) {
    let peer = descriptor.node_rid.short_hex();
    match rejection {
        Rejection::UnknownBlockchain => {
            info!(%peer, "Chain id not found, chain not started or not run here")
        }
        Rejection::LostOwnChain => error!(%peer, "We initiated this connection but lost the chain"),
        Rejection::ChainGone => info!(%peer, "Chain not found"),
        Rejection::Misbehaving => debug!(%peer, "Peer not behaving well, ignored"),
        Rejection::DuplicateLost => debug!(%peer, "Duplicate connection rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::PeerQualityPolicy;
    use crate::test_util::{chain_config, node, peer_info, wait_until, MockConnection, MockConnectorFactory};
    use bach_primitives::BlockchainRid;
    use bytes::Bytes;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    const RID: BlockchainRid = BlockchainRid::from_bytes([7u8; 32]);

    fn fast_config() -> PeeringConfig {
        PeeringConfig {
            backup_connect_min_ms: 50,
            backup_connect_max_ms: 60,
            reconnect_min_ms: 20,
            reconnect_max_ms: 30,
            max_reconnect_delay_ms: 300,
            ..Default::default()
        }
    }

    fn manager(me: u8) -> (Arc<ConnectionManager>, MockConnectorFactory) {
        manager_with(me, fast_config())
    }

    fn manager_with(me: u8, config: PeeringConfig) -> (Arc<ConnectionManager>, MockConnectorFactory) {
        let factory = MockConnectorFactory::new();
        let manager = ConnectionManager::new(peer_info(me), &factory, config).unwrap();
        (manager, factory)
    }

    fn packet(data: &'static [u8]) -> LazyPacket {
        Arc::new(move || Bytes::from_static(data))
    }

    struct Refuse;

    impl PeerQualityPolicy for Refuse {
        fn is_node_behaving_well(&self, _node: &NodeRid, _now: Instant) -> bool {
            false
        }
    }

    #[test]
    fn test_factory_gets_live_events() {
        let (manager, factory) = manager(1);
        let events = factory.events.lock().clone().unwrap();
        assert!(events.upgrade().is_some());
        manager.shutdown();
    }

    #[test]
    fn test_connect_chain_twice() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        let result = manager.connect_chain(chain_config(7, RID, 1, &[2]), false);
        assert!(matches!(result, Err(NetworkError::AlreadyConnected(7))));
        manager.shutdown();
    }

    #[test]
    fn test_connect_chain_rid_in_use() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        let result = manager.connect_chain(chain_config(8, RID, 1, &[2]), false);
        assert!(matches!(result, Err(NetworkError::BlockchainRidInUse { .. })));
        manager.shutdown();
    }

    #[test]
    fn test_disconnect_unknown_chain_is_noop() {
        let (manager, _factory) = manager(1);
        manager.disconnect_chain(99).unwrap();
        manager.disconnect_chain(99).unwrap();
        manager.shutdown();
    }

    #[test]
    fn test_connect_all_dials_lower_ids() {
        let (manager, factory) = manager(3);
        manager.connect_chain(chain_config(7, RID, 3, &[1, 2, 4]), true).unwrap();
        assert_eq!(factory.connector.dialed(&node(1)), 1);
        assert_eq!(factory.connector.dialed(&node(2)), 1);
        assert_eq!(factory.connector.dialed(&node(4)), 0);
        let dials = factory.connector.dials.lock().clone();
        assert!(dials.iter().all(|d| d.is_outgoing() && d.blockchain_rid == RID));
        manager.shutdown();
    }

    #[test]
    fn test_connect_chain_peer_errors() {
        let (manager, _factory) = manager(1);
        assert!(matches!(
            manager.connect_chain_peer(7, &node(2)),
            Err(NetworkError::UnknownChain(7))
        ));
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        assert!(matches!(
            manager.connect_chain_peer(7, &node(9)),
            Err(NetworkError::UnknownPeer(_))
        ));
        assert!(matches!(
            manager.disconnect_chain_peer(8, &node(2)),
            Err(NetworkError::UnknownChain(8))
        ));
        manager.shutdown();
    }

    #[test]
    fn test_connect_chain_peer_already_connected() {
        let (manager, factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        manager.on_node_connected(MockConnection::incoming(RID, node(2))).unwrap();
        manager.connect_chain_peer(7, &node(2)).unwrap();
        assert_eq!(factory.connector.dialed(&node(2)), 0);
        manager.shutdown();
    }

    #[test]
    fn test_incoming_accepted() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2, 3]), false).unwrap();
        let conn = MockConnection::incoming(RID, node(2));
        assert!(manager.on_node_connected(conn.clone()).is_some());
        assert!(!conn.is_closed());
        assert!(manager.is_peer_connected(7, &node(2)));
        assert!(!manager.is_peer_connected(7, &node(3)));
        assert_eq!(manager.get_connected_nodes(7), vec![node(2)]);
        assert_eq!(manager.stats(), "chains: 1, connections: 1");
        manager.shutdown();
    }

    #[test]
    fn test_unknown_blockchain_rejected() {
        let (manager, _factory) = manager(1);
        let conn = MockConnection::incoming(BlockchainRid::repeat(0xee), node(2));
        assert!(manager.on_node_connected(conn.clone()).is_none());
        assert!(conn.is_closed());
        manager.shutdown();
    }

    #[test]
    fn test_disconnected_chain_rejects_both_directions() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        manager.disconnect_chain(7).unwrap();

        let incoming = MockConnection::incoming(RID, node(2));
        assert!(manager.on_node_connected(incoming.clone()).is_none());
        assert!(incoming.is_closed());

        let outgoing = MockConnection::outgoing(RID, node(2));
        assert!(manager.on_node_connected(outgoing.clone()).is_none());
        assert!(outgoing.is_closed());
        manager.shutdown();
    }

    #[test]
    fn test_misbehaving_node_rejected() {
        let (manager, _factory) = manager(1);
        let config = chain_config(7, RID, 1, &[2]).with_quality_policy(Arc::new(Refuse));
        manager.connect_chain(config, false).unwrap();
        let conn = MockConnection::incoming(RID, node(2));
        assert!(manager.on_node_connected(conn.clone()).is_none());
        assert!(conn.is_closed());
        assert!(!manager.is_peer_connected(7, &node(2)));
        manager.shutdown();
    }

    #[test]
    fn test_duplicate_lower_id_keeps_incoming() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        let original = MockConnection::incoming(RID, node(2));
        manager.on_node_connected(original.clone()).unwrap();

        let duplicate = MockConnection::outgoing(RID, node(2));
        assert!(manager.on_node_connected(duplicate.clone()).is_none());
        assert!(duplicate.is_closed());
        assert!(!original.is_closed());
        assert_eq!(manager.get_chain_nodes_topology(7).get("02").map(String::as_str), Some("in"));
        manager.shutdown();
    }

    #[test]
    fn test_duplicate_higher_id_replaces_incoming() {
        let (manager, _factory) = manager(2);
        manager.connect_chain(chain_config(7, RID, 2, &[1]), false).unwrap();
        let original = MockConnection::incoming(RID, node(1));
        manager.on_node_connected(original.clone()).unwrap();

        let replacement = MockConnection::outgoing(RID, node(1));
        assert!(manager.on_node_connected(replacement.clone()).is_some());
        assert!(original.is_closed());
        assert!(!replacement.is_closed());
        assert_eq!(manager.get_chain_nodes_topology(7).get("01").map(String::as_str), Some("out"));

        // The replaced link reports its close; the live one stays
        manager.on_node_disconnected(original);
        assert!(manager.is_peer_connected(7, &node(1)));
        manager.shutdown();
    }

    #[test]
    fn test_disconnect_removes_same_instance_only() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        let live = MockConnection::incoming(RID, node(2));
        manager.on_node_connected(live.clone()).unwrap();

        let stale = MockConnection::incoming(RID, node(2));
        manager.on_node_disconnected(stale.clone());
        assert!(stale.is_closed());
        assert!(manager.is_peer_connected(7, &node(2)));

        manager.on_node_disconnected(live.clone());
        assert!(live.is_closed());
        assert!(!manager.is_peer_connected(7, &node(2)));
        manager.shutdown();
    }

    #[test]
    fn test_lost_connection_is_redialed() {
        // Backup pass far beyond the test, so only the reconnect dials
        let config = PeeringConfig {
            backup_connect_min_ms: 60_000,
            backup_connect_max_ms: 60_000,
            ..fast_config()
        };
        let (manager, factory) = manager_with(1, config);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), true).unwrap();
        let conn = MockConnection::incoming(RID, node(2));
        manager.on_node_connected(conn.clone()).unwrap();
        assert_eq!(factory.connector.dialed(&node(2)), 0);

        manager.on_node_disconnected(conn);
        let scheduled = manager.pending_reconnect_delay(&node(2)).unwrap();
        assert!(scheduled >= Duration::from_millis(20) && scheduled <= Duration::from_millis(30));
        assert!(wait_until(Duration::from_secs(2), || factory.connector.dialed(&node(2)) == 1));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(factory.connector.dialed(&node(2)), 1);
        manager.shutdown();
    }

    #[test]
    fn test_disconnect_chain_after_shutdown() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), true).unwrap();
        manager.shutdown();
        manager.disconnect_chain(7).unwrap();
        manager.disconnect_chain(8).unwrap();
        assert!(manager.is_shut_down());
    }

    #[test]
    fn test_lost_connection_not_redialed_without_connect_all() {
        let (manager, factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        let conn = MockConnection::incoming(RID, node(2));
        manager.on_node_connected(conn.clone()).unwrap();
        manager.on_node_disconnected(conn);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(factory.connector.dialed(&node(2)), 0);
        assert!(manager.pending_reconnect_delay(&node(2)).is_none());
        manager.shutdown();
    }

    #[test]
    fn test_send_and_broadcast() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2, 3, 4]), false).unwrap();
        let a = MockConnection::incoming(RID, node(2));
        let b = MockConnection::incoming(RID, node(3));
        manager.on_node_connected(a.clone()).unwrap();
        manager.on_node_connected(b.clone()).unwrap();

        manager.send_packet(packet(b"one"), 7, &node(2)).unwrap();
        manager.send_packet(packet(b"nobody"), 7, &node(4)).unwrap();
        manager.broadcast_packet(packet(b"all"), 7).unwrap();

        assert_eq!(a.sent(), vec![Bytes::from_static(b"one"), Bytes::from_static(b"all")]);
        assert_eq!(b.sent(), vec![Bytes::from_static(b"all")]);
        assert!(matches!(
            manager.broadcast_packet(packet(b"x"), 8),
            Err(NetworkError::UnknownChain(8))
        ));
        manager.shutdown();
    }

    #[test]
    fn test_disconnect_chain_closes_connections() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), true).unwrap();
        let conn = MockConnection::incoming(RID, node(2));
        manager.on_node_connected(conn.clone()).unwrap();
        manager.disconnect_chain(7).unwrap();
        assert!(conn.is_closed());
        assert!(!manager.has_chain(7));
        assert!(manager.get_connected_nodes(7).is_empty());

        // The close comes back through the transport; the chain is gone
        manager.on_node_disconnected(conn);
        assert!(manager.pending_reconnect_delay(&node(2)).is_none());

        // Chain can be registered again under the same ids
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        manager.shutdown();
    }

    #[test]
    fn test_disconnect_chain_peer() {
        let (manager, _factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        let conn = MockConnection::incoming(RID, node(2));
        manager.on_node_connected(conn.clone()).unwrap();
        manager.disconnect_chain_peer(7, &node(2)).unwrap();
        assert!(conn.is_closed());
        assert!(!manager.is_peer_connected(7, &node(2)));
        manager.disconnect_chain_peer(7, &node(2)).unwrap();
        manager.shutdown();
    }

    #[test]
    fn test_topology() {
        let (manager, _factory) = manager(2);
        manager.connect_chain(chain_config(7, RID, 2, &[1, 3]), false).unwrap();
        manager.on_node_connected(MockConnection::outgoing(RID, node(1))).unwrap();
        manager.on_node_connected(MockConnection::incoming(RID, node(3))).unwrap();

        let topology = manager.get_nodes_topology();
        let chain = topology.get(&RID.to_hex()).unwrap();
        assert_eq!(chain.get("01").map(String::as_str), Some("out"));
        assert_eq!(chain.get("03").map(String::as_str), Some("in"));
        manager.shutdown();
    }

    #[test]
    fn test_shutdown() {
        let (manager, factory) = manager(1);
        manager.connect_chain(chain_config(7, RID, 1, &[2]), false).unwrap();
        let conn = MockConnection::incoming(RID, node(2));
        manager.on_node_connected(conn.clone()).unwrap();

        manager.shutdown();
        assert!(manager.is_shut_down());
        assert!(conn.is_closed());
        assert!(factory.connector.shut_down.load(Ordering::SeqCst));

        assert!(matches!(
            manager.connect_chain(chain_config(8, BlockchainRid::repeat(8), 1, &[2]), false),
            Err(NetworkError::AlreadyShutDown)
        ));
        assert!(matches!(manager.connect_chain_peer(7, &node(2)), Err(NetworkError::AlreadyShutDown)));
        manager.disconnect_chain(7).unwrap();
        assert!(!manager.has_chain(7));
        assert!(matches!(
            manager.send_packet(packet(b"x"), 7, &node(2)),
            Err(NetworkError::AlreadyShutDown)
        ));

        let late = MockConnection::incoming(RID, node(2));
        assert!(manager.on_node_connected(late.clone()).is_none());
        assert!(late.is_closed());

        manager.shutdown();
    }

    #[test]
    fn test_invalid_config() {
        let factory = MockConnectorFactory::new();
        let config = PeeringConfig {
            reconnect_min_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            ConnectionManager::new(peer_info(1), &factory, config),
            Err(NetworkError::InvalidConfig(_))
        ));
    }
}
