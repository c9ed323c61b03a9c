//! In-process transport
//!
//! Connects nodes living in the same process. Every dial creates a link with
//! two ends, one per node. Dial results and closes are reported from tasks on
//! the network's tokio runtime, never from inside the calling method. Packets
//! are queued per end and delivered in order once that end has a handler.

use crate::connector::{Connection, ConnectorFactory, NodeConnector, NodeConnectorEvents, PeerPacketHandler};
use crate::types::{ConnectionDescriptor, ConnectionDirection, LazyPacket, PeerInfo};
use bach_primitives::NodeRid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// Hub of every node reachable in this process
pub struct LocalNetwork {
    handle: Handle,
    nodes: Mutex<HashMap<NodeRid, Weak<dyn NodeConnectorEvents>>>,
}

impl LocalNetwork {
    /// Create a network whose callbacks run on `handle`
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            nodes: Mutex::new(HashMap::new()),
        })
    }

    /// Connector factory attaching nodes to this network
    pub fn factory(self: &Arc<Self>) -> LocalConnectorFactory {
        LocalConnectorFactory {
            network: self.clone(),
        }
    }

    /// Check if `node` is reachable
    pub fn is_registered(&self, node: &NodeRid) -> bool {
        self.nodes.lock().contains_key(node)
    }

    /// Every reachable node
    pub fn registered_nodes(&self) -> Vec<NodeRid> {
        self.nodes.lock().keys().cloned().collect()
    }

    fn register(&self, node: NodeRid, events: Weak<dyn NodeConnectorEvents>) {
        debug!(node = %node.short_hex(), "Node joined local network");
        self.nodes.lock().insert(node, events);
    }

    fn unregister(&self, node: &NodeRid, events: &Weak<dyn NodeConnectorEvents>) {
        let mut nodes = self.nodes.lock();
        if nodes.get(node).map_or(false, |current| Weak::ptr_eq(current, events)) {
            nodes.remove(node);
            debug!(node = %node.short_hex(), "Node left local network");
        }
    }

    fn establish(&self, dialer: NodeRid, dialer_events: Weak<dyn NodeConnectorEvents>, descriptor: ConnectionDescriptor) {
        let remote = descriptor.node_rid.clone();
        let remote_events = self.nodes.lock().get(&remote).and_then(Weak::upgrade);
        let link = Link::new(
            self.handle.clone(),
            (dialer.clone(), Some(dialer_events.clone())),
            (remote.clone(), remote_events.as_ref().map(Arc::downgrade)),
        );
        let outgoing = LocalConnection::attach(&link, DIALER, descriptor.clone());

        let Some(remote_events) = remote_events else {
            debug!(remote = %remote.short_hex(), "Dial failed, node not reachable");
            link.closed.store(true, Ordering::SeqCst);
            if let Some(events) = dialer_events.upgrade() {
                events.on_node_disconnected(outgoing);
            }
            return;
        };

        let incoming = LocalConnection::attach(
            &link,
            LISTENER,
            ConnectionDescriptor::new(descriptor.blockchain_rid, dialer, ConnectionDirection::Incoming),
        );
        match remote_events.on_node_connected(incoming) {
            Some(handler) => link.start_delivery(LISTENER, handler),
            None => {
                link.close();
                return;
            }
        }
        if link.is_closed() {
            return;
        }

        let accepted = dialer_events
            .upgrade()
            .and_then(|events| events.on_node_connected(outgoing));
        match accepted {
            Some(handler) => link.start_delivery(DIALER, handler),
            None => link.close(),
        }
    }
}

const DIALER: usize = 0;
const LISTENER: usize = 1;

struct LinkEnd {
    node: NodeRid,
    events: Option<Weak<dyn NodeConnectorEvents>>,
    connection: Mutex<Weak<LocalConnection>>,
    inbox: Mutex<Option<UnboundedSender<LazyPacket>>>,
    inbox_rx: Mutex<Option<UnboundedReceiver<LazyPacket>>>,
}

impl LinkEnd {
    fn new(node: NodeRid, events: Option<Weak<dyn NodeConnectorEvents>>) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            node,
            events,
            connection: Mutex::new(Weak::new()),
            inbox: Mutex::new(Some(tx)),
            inbox_rx: Mutex::new(Some(rx)),
        }
    }
}

struct Link {
    handle: Handle,
    closed: AtomicBool,
    ends: [LinkEnd; 2],
}

impl Link {
    fn new(
        handle: Handle,
        dialer: (NodeRid, Option<Weak<dyn NodeConnectorEvents>>),
        listener: (NodeRid, Option<Weak<dyn NodeConnectorEvents>>),
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            closed: AtomicBool::new(false),
            ends: [LinkEnd::new(dialer.0, dialer.1), LinkEnd::new(listener.0, listener.1)],
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send_to(&self, side: usize, packet: LazyPacket) {
        if self.is_closed() {
            trace!("Link closed, packet dropped");
            return;
        }
        if let Some(inbox) = self.ends[side].inbox.lock().as_ref() {
            let _ = inbox.send(packet);
        }
    }

    /// Deliver packets queued for `side` to `handler`, in order
    fn start_delivery(self: &Arc<Self>, side: usize, handler: Arc<dyn PeerPacketHandler>) {
        let Some(mut rx) = self.ends[side].inbox_rx.lock().take() else {
            return;
        };
        let sender = self.ends[1 - side].node.clone();
        let link = Arc::downgrade(self);
        self.handle.spawn(async move {
            while let Some(packet) = rx.recv().await {
                match link.upgrade() {
                    Some(link) if !link.is_closed() => {}
                    _ => break,
                }
                handler.handle(packet(), &sender);
            }
        });
    }

    /// Close both ends and report each to its node
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut reports = Vec::with_capacity(2);
        for end in &self.ends {
            end.inbox.lock().take();
            let connection = end.connection.lock().upgrade();
            if let (Some(events), Some(connection)) = (end.events.clone(), connection) {
                reports.push((events, connection));
            }
        }
        self.handle.spawn(async move {
            for (events, connection) in reports {
                if let Some(events) = events.upgrade() {
                    events.on_node_disconnected(connection);
                }
            }
        });
    }
}

/// One end of an in-process link
pub struct LocalConnection {
    link: Arc<Link>,
    side: usize,
    descriptor: ConnectionDescriptor,
}

impl LocalConnection {
    fn attach(link: &Arc<Link>, side: usize, descriptor: ConnectionDescriptor) -> Arc<Self> {
        let connection = Arc::new(Self {
            link: link.clone(),
            side,
            descriptor,
        });
        *link.ends[side].connection.lock() = Arc::downgrade(&connection);
        connection
    }

    /// Check if the link is down
    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }
}

impl Connection for LocalConnection {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn send_packet(&self, packet: LazyPacket) {
        self.link.send_to(1 - self.side, packet);
    }

    fn close(&self) {
        self.link.close();
    }
}

/// Builds [`LocalConnector`]s attached to one [`LocalNetwork`]
pub struct LocalConnectorFactory {
    network: Arc<LocalNetwork>,
}

impl ConnectorFactory for LocalConnectorFactory {
    fn create(&self, me: &PeerInfo, events: Weak<dyn NodeConnectorEvents>) -> Arc<dyn NodeConnector> {
        self.network.register(me.node_rid.clone(), events.clone());
        Arc::new(LocalConnector {
            network: self.network.clone(),
            me: me.node_rid.clone(),
            events,
        })
    }
}

/// Dials other nodes of a [`LocalNetwork`]
pub struct LocalConnector {
    network: Arc<LocalNetwork>,
    me: NodeRid,
    events: Weak<dyn NodeConnectorEvents>,
}

impl NodeConnector for LocalConnector {
    fn connect_node(&self, descriptor: ConnectionDescriptor, peer: &PeerInfo) {
        trace!(peer = %peer.node_rid.short_hex(), host = %peer.host, port = peer.port, "Dialing");
        let network = self.network.clone();
        let me = self.me.clone();
        let events = self.events.clone();
        self.network.handle.spawn(async move {
            network.establish(me, events, descriptor);
        });
    }

    fn shutdown(&self) {
        self.network.unregister(&self.me, &self.events);
    }
}
