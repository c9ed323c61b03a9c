//! Who dials whom, and when to dial again
//!
//! Only one side of a peer pair dials: the node with the greater id. A
//! one-shot backup pass later dials every configured peer that is still
//! missing, in case the designated dialer is down. Lost links are redialed by
//! both sides after a per-peer exponential backoff.

use crate::backoff::ExponentialDelay;
use crate::config::PeeringConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::timer::TimerQueue;
use bach_primitives::{BlockchainRid, ChainId, NodeRid};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::Weak;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

/// The manager operations the strategy needs.
///
/// Strategy methods called while the manager lock is held get a view that
/// already owns the lock; timer callbacks go through the manager itself.
pub trait PeerConnectionManager: Send + Sync {
    /// Dial `peer` for `chain_id`
    fn connect_chain_peer(&self, chain_id: ChainId, peer: &NodeRid) -> NetworkResult<()>;

    /// Check if `peer` has a live connection for `chain_id`
    fn is_peer_connected(&self, chain_id: ChainId, peer: &NodeRid) -> bool;

    /// Peers with a live connection for `chain_id`
    fn get_connected_nodes(&self, chain_id: ChainId) -> Vec<NodeRid>;
}

/// Decides dialing, tie-breaks and reconnects
pub struct ConnectionStrategy {
    me: NodeRid,
    config: PeeringConfig,
    delays: Mutex<HashMap<NodeRid, ExponentialDelay>>,
    chain_peers: Mutex<HashMap<ChainId, BTreeSet<NodeRid>>>,
    timers: TimerQueue,
    manager: Weak<dyn PeerConnectionManager>,
}

impl ConnectionStrategy {
    /// Create a strategy for the local node `me`
    pub fn new(me: NodeRid, config: PeeringConfig, manager: Weak<dyn PeerConnectionManager>) -> NetworkResult<Self> {
        config.validate()?;
        let timers = TimerQueue::new("peering-timer")?;
        Ok(Self::with_timers(me, config, timers, manager))
    }

    pub(crate) fn with_timers(
        me: NodeRid,
        config: PeeringConfig,
        timers: TimerQueue,
        manager: Weak<dyn PeerConnectionManager>,
    ) -> Self {
        debug!(me = %me.short_hex(), "Connection strategy created");
        Self {
            me,
            config,
            delays: Mutex::new(HashMap::new()),
            chain_peers: Mutex::new(HashMap::new()),
            timers,
            manager,
        }
    }

    /// Dial the peers we initiate to, then schedule the backup pass
    pub fn connect_all(
        &self,
        peers: &dyn PeerConnectionManager,
        chain_id: ChainId,
        blockchain_rid: BlockchainRid,
        peer_ids: BTreeSet<NodeRid>,
    ) {
        for peer in peer_ids.iter().filter(|p| self.should_i_connect(p)) {
            log_dial_failure(chain_id, peer, peers.connect_chain_peer(chain_id, peer));
        }
        self.chain_peers.lock().insert(chain_id, peer_ids.clone());

        let delay = random_delay(self.config.backup_connect_min_ms, self.config.backup_connect_max_ms);
        let manager = self.manager.clone();
        self.timers.schedule(delay, move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let _span = info_span!("backup_connect", blockchain_rid = %blockchain_rid.short_hex(), chain_id).entered();
            let connected: BTreeSet<NodeRid> = manager.get_connected_nodes(chain_id).into_iter().collect();
            for peer in peer_ids.difference(&connected) {
                debug!(peer = %peer.short_hex(), "Backup connect");
                if let Err(err) = manager.connect_chain_peer(chain_id, peer) {
                    if ignore_timer_error(&err) {
                        return;
                    }
                    log_dial_failure(chain_id, peer, Err(err));
                }
            }
        });
    }

    /// The node with the greater id dials
    pub fn should_i_connect(&self, peer: &NodeRid) -> bool {
        initiates(&self.me, peer)
    }

    /// Returns true when the new connection should replace the original one.
    ///
    /// The surviving link is always the one dialed by the greater id, so both
    /// ends agree without talking to each other.
    pub fn duplicate_connection_detected(&self, _chain_id: ChainId, is_original_outgoing: bool, peer: &NodeRid) -> bool {
        replaces_original(&self.me, peer, is_original_outgoing)
    }

    /// Schedule a reconnect to `peer` after its backoff delay
    pub fn connection_lost(
        &self,
        peers: &dyn PeerConnectionManager,
        chain_id: ChainId,
        blockchain_rid: BlockchainRid,
        peer: &NodeRid,
        is_outgoing: bool,
    ) {
        if peers.is_peer_connected(chain_id, peer) {
            debug!(peer = %peer.short_hex(), "Lost a duplicate link, peer still connected");
            return;
        }
        let known = self
            .chain_peers
            .lock()
            .get(&chain_id)
            .map_or(false, |known| known.contains(peer));
        if !known {
            debug!(peer = %peer.short_hex(), chain_id, "Not reconnecting to unconfigured peer");
            return;
        }

        let delay = {
            let mut delays = self.delays.lock();
            delays
                .entry(peer.clone())
                .or_insert_with(|| {
                    ExponentialDelay::new(
                        random_delay(self.config.reconnect_min_ms, self.config.reconnect_max_ms),
                        self.config.max_reconnect_delay(),
                    )
                })
                .next_delay()
        };
        info!(
            me = %self.me.short_hex(),
            chain_id,
            peer = %peer.short_hex(),
            outgoing = is_outgoing,
            "Reconnecting in {} ms",
            delay.as_millis()
        );

        let manager = self.manager.clone();
        let peer = peer.clone();
        self.timers.schedule(delay, move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let _span = info_span!("reconnect", blockchain_rid = %blockchain_rid.short_hex(), chain_id).entered();
            info!(peer = %peer.short_hex(), "Reconnecting");
            if let Err(err) = manager.connect_chain_peer(chain_id, &peer) {
                if !ignore_timer_error(&err) {
                    log_dial_failure(chain_id, &peer, Err(err));
                }
            }
        });
    }

    /// Forget the backoff state of `peer`
    pub fn connection_established(&self, _chain_id: ChainId, _is_outgoing: bool, peer: &NodeRid) {
        self.delays.lock().remove(peer);
    }

    /// Drop the peer set recorded for a chain
    pub fn chain_disconnected(&self, chain_id: ChainId) {
        self.chain_peers.lock().remove(&chain_id);
    }

    /// Delay of the reconnect scheduled for `peer`, if it is backing off
    pub fn pending_reconnect_delay(&self, peer: &NodeRid) -> Option<Duration> {
        self.delays.lock().get(peer).and_then(ExponentialDelay::last)
    }

    /// Cancel every pending timer
    pub fn shutdown(&self) {
        debug!("Shutting down connection strategy");
        self.timers.shutdown(self.config.shutdown_timeout());
        debug!("Shutting down connection strategy done");
    }

    /// Check if timers have been cancelled
    pub fn is_shut_down(&self) -> bool {
        self.timers.is_shut_down()
    }
}

fn initiates(me: &NodeRid, peer: &NodeRid) -> bool {
    me > peer
}

fn replaces_original(me: &NodeRid, peer: &NodeRid, is_original_outgoing: bool) -> bool {
    if initiates(me, peer) {
        !is_original_outgoing
    } else {
        is_original_outgoing
    }
}

fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

// The chain may go away while a timer is pending
fn ignore_timer_error(err: &NetworkError) -> bool {
    match err {
        NetworkError::UnknownChain(_) | NetworkError::AlreadyShutDown => {
            debug!(error = %err, "Timer fired for a chain that is gone");
            true
        }
        _ => false,
    }
}

fn log_dial_failure(chain_id: ChainId, peer: &NodeRid, result: NetworkResult<()>) {
    if let Err(err) = result {
        warn!(chain_id, peer = %peer.short_hex(), error = %err, "Failed to connect peer");
    }
}
