use std::sync::Arc;

use anyhow::Result;
use chain::NodeStatusProvider;
use chain::config::PROTOCOL_V1;
use containers::{Hash, HeadAnnouncement};
use parking_lot::Mutex;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, trace, warn};

use super::switchboard::LocalSwitchboard;
use crate::{
    handler::IncomingMessageHandler,
    message::{Message, P2pMessage},
    sync::{PeerManager, SyncerHandle},
    types::{ConnectionState, Hub, OutboundP2pRequest, P2pRequestSource},
};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct NetworkServiceConfig {
    pub node_id: String,
    pub protocol_version: u32,
    /// Head announcement and keepalive ping period.
    pub heartbeat_interval: Duration,
    /// How often the switchboard is scanned for new or vanished peers.
    pub reconnect_interval: Duration,
}

impl NetworkServiceConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            protocol_version: PROTOCOL_V1,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    PeerConnected(String),
    PeerDisconnected(String),
}

/// Node-side [`Hub`]: queues outbound messages for the [`NetworkService`] and
/// records peer heads in the shared registry.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    outbound: mpsc::UnboundedSender<OutboundP2pRequest>,
    peers: Arc<Mutex<PeerManager>>,
}

impl NetworkHandle {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundP2pRequest>,
        peers: Arc<Mutex<PeerManager>>,
    ) -> Self {
        Self { outbound, peers }
    }

    fn queue(&self, request: OutboundP2pRequest) {
        if let Err(err) = self.outbound.send(request) {
            warn!("failed to queue outbound request: {err}");
        }
    }
}

impl Hub for NetworkHandle {
    fn send_to_peer(&self, peer_id: &str, message: Message) {
        self.queue(OutboundP2pRequest::SendToPeer {
            peer_id: peer_id.to_string(),
            message,
        });
    }

    fn broadcast_message(&self, message: Message) {
        self.queue(OutboundP2pRequest::Broadcast(message));
    }

    fn set_peer_head(&self, peer_id: &str, hash: Hash, height: u64) {
        self.peers.lock().set_peer_head(peer_id, hash, height);
    }
}

pub struct NetworkService<R>
where
    R: P2pRequestSource<OutboundP2pRequest> + Send + 'static,
{
    config: Arc<NetworkServiceConfig>,
    switchboard: LocalSwitchboard,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    peer_table: Arc<Mutex<PeerManager>>,
    outbound_p2p_requests: R,
    handler: Arc<IncomingMessageHandler>,
    node_status: Arc<dyn NodeStatusProvider>,
    syncer: Option<SyncerHandle>,
    announced_height: Option<u64>,
}

impl<R> NetworkService<R>
where
    R: P2pRequestSource<OutboundP2pRequest> + Send + 'static,
{
    /// Register on `switchboard` under the configured node id.
    pub fn new(
        config: Arc<NetworkServiceConfig>,
        switchboard: LocalSwitchboard,
        peer_table: Arc<Mutex<PeerManager>>,
        outbound_p2p_requests: R,
        handler: Arc<IncomingMessageHandler>,
        node_status: Arc<dyn NodeStatusProvider>,
    ) -> Self {
        let inbox = switchboard.register(&config.node_id);
        Self {
            config,
            switchboard,
            inbox,
            peer_table,
            outbound_p2p_requests,
            handler,
            node_status,
            syncer: None,
            announced_height: None,
        }
    }

    /// Notify `syncer` whenever a peer connects.
    pub fn with_syncer(mut self, syncer: SyncerHandle) -> Self {
        self.syncer = Some(syncer);
        self
    }

    /// Run until the outbound request source or the inbox closes.
    pub async fn start(&mut self) -> Result<()> {
        let mut reconnect_interval = interval(self.config.reconnect_interval);
        reconnect_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = reconnect_interval.tick() => {
                    for event in self.connect_to_peers() {
                        info!(node = %self.config.node_id, ?event, "Network event");
                    }
                }
                _ = heartbeat_interval.tick() => {
                    self.announce_head_if_advanced();
                    self.ping_peers();
                }
                request = self.outbound_p2p_requests.recv() => {
                    let Some(request) = request else {
                        info!(node = %self.config.node_id, "Outbound request source closed, stopping network service");
                        break;
                    };
                    self.dispatch_outbound_request(request);
                }
                data = self.inbox.recv() => {
                    let Some(data) = data else {
                        info!(node = %self.config.node_id, "Inbox closed, stopping network service");
                        break;
                    };
                    self.handle_inbound(data);
                }
            }
        }

        self.switchboard.unregister(&self.config.node_id);
        Ok(())
    }

    /// Sync the peer table with the switchboard.
    fn connect_to_peers(&mut self) -> Vec<NetworkEvent> {
        let mut events = Vec::new();
        let available = self.switchboard.node_ids();

        for node_id in &available {
            if *node_id == self.config.node_id {
                continue;
            }
            let connected = self
                .peer_table
                .lock()
                .get_peer(node_id)
                .is_some_and(|peer| peer.is_connected());
            if !connected {
                events.push(self.on_peer_connected(node_id));
            }
        }

        let vanished: Vec<String> = self
            .peer_table
            .lock()
            .connected_peers()
            .filter(|peer| !available.contains(&peer.peer_id))
            .map(|peer| peer.peer_id.clone())
            .collect();
        for peer_id in vanished {
            events.push(self.on_peer_disconnected(&peer_id));
        }

        events
    }

    fn on_peer_connected(&mut self, peer_id: &str) -> NetworkEvent {
        let connected = {
            let mut peers = self.peer_table.lock();
            peers.add_peer(peer_id, ConnectionState::Connected);
            peers.connected_peers().count()
        };
        info!(node = %self.config.node_id, peer = peer_id, "Connected to peer (total: {connected})");

        // A new peer learns our head right away rather than on the next change.
        let status = self.node_status.current_status();
        self.send(
            peer_id,
            &Message::SequencerHeader(HeadAnnouncement {
                hash: Some(status.current_block),
                number: status.current_id,
            }),
        );

        if let Some(syncer) = &self.syncer {
            syncer.peer_connected(peer_id);
        }

        NetworkEvent::PeerConnected(peer_id.to_string())
    }

    fn on_peer_disconnected(&mut self, peer_id: &str) -> NetworkEvent {
        let connected = {
            let mut peers = self.peer_table.lock();
            peers.update_connection_state(peer_id, ConnectionState::Disconnected);
            peers.connected_peers().count()
        };
        info!(node = %self.config.node_id, peer = peer_id, "Disconnected from peer (total: {connected})");
        NetworkEvent::PeerDisconnected(peer_id.to_string())
    }

    fn announce_head_if_advanced(&mut self) {
        let status = self.node_status.current_status();
        if self.announced_height == Some(status.current_id) {
            return;
        }

        debug!(node = %self.config.node_id, height = status.current_id, "Announcing head");
        self.announced_height = Some(status.current_id);
        self.broadcast(&Message::SequencerHeader(HeadAnnouncement {
            hash: Some(status.current_block),
            number: status.current_id,
        }));
    }

    fn ping_peers(&mut self) {
        self.broadcast(&Message::Ping);
    }

    fn dispatch_outbound_request(&mut self, request: OutboundP2pRequest) {
        match request {
            OutboundP2pRequest::SendToPeer { peer_id, message } => self.send(&peer_id, &message),
            OutboundP2pRequest::Broadcast(message) => self.broadcast(&message),
        }
    }

    fn broadcast(&mut self, message: &Message) {
        let peers: Vec<String> = self
            .peer_table
            .lock()
            .connected_peers()
            .map(|peer| peer.peer_id.clone())
            .collect();
        for peer_id in peers {
            self.send(&peer_id, message);
        }
    }

    fn send(&mut self, peer_id: &str, message: &Message) {
        let data = match P2pMessage::new(&self.config.node_id, self.config.protocol_version, message)
            .and_then(|envelope| envelope.encode())
        {
            Ok(data) => data,
            Err(err) => {
                warn!(peer = peer_id, %message, %err, "Failed to encode outbound message");
                return;
            }
        };

        trace!(node = %self.config.node_id, peer = peer_id, %message, "Sending message");
        if !self.switchboard.deliver(peer_id, data) {
            warn!(node = %self.config.node_id, peer = peer_id, %message, "Peer unreachable");
            self.on_peer_disconnected(peer_id);
        }
    }

    fn handle_inbound(&mut self, data: Vec<u8>) {
        let envelope = match P2pMessage::decode(&data) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(node = %self.config.node_id, %err, "Dropping undecodable envelope");
                return;
            }
        };
        let peer_id = envelope.source_id.clone();

        if envelope.version != self.config.protocol_version {
            warn!(
                peer = %peer_id,
                version = envelope.version,
                expected = self.config.protocol_version,
                "Dropping message with foreign protocol version"
            );
            return;
        }

        let message = match envelope.message() {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %peer_id, %err, "Dropping undecodable message");
                return;
            }
        };

        let known = self
            .peer_table
            .lock()
            .get_peer(&peer_id)
            .is_some_and(|peer| peer.is_connected());
        if !known {
            let event = self.on_peer_connected(&peer_id);
            info!(node = %self.config.node_id, ?event, "Network event");
        }

        self.handler.handle(&peer_id, message);
    }
}
