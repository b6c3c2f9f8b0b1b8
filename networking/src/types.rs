use std::fmt::Display;

use containers::{Hash, Sequencer, Tx, Txi};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::message::Message;

/// Peer connection state.
///
/// DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No active connection to this peer.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Can exchange protocol messages.
    Connected,
}

/// The peer with the highest advertised head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestPeer {
    pub peer_id: String,
    pub head_hash: Hash,
    pub head_height: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("no connected peers")]
    NoPeers,
    #[error("no connected peer has announced a head")]
    NoHead,
}

/// Reports the best-known peer and its advertised head.
pub trait PeerProvider: Send + Sync {
    fn best_peer_info(&self) -> Result<BestPeer, PeerError>;
}

/// Outbound side of the peer transport.
pub trait Hub: Send + Sync {
    fn send_to_peer(&self, peer_id: &str, message: Message);

    fn broadcast_message(&self, message: Message);

    /// Record a peer's advertised head.
    fn set_peer_head(&self, peer_id: &str, hash: Hash, height: u64);
}

/// Items handed to the transaction buffer for validation and ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxBufferMessage {
    RemoteTx(Txi),
    RemoteTxs { sequencer: Sequencer, txs: Vec<Tx> },
}

impl Display for TxBufferMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxBufferMessage::RemoteTx(txi) => write!(f, "RemoteTx({txi})"),
            TxBufferMessage::RemoteTxs { sequencer, txs } => {
                write!(f, "RemoteTxs(id={}, txs={})", sequencer.id, txs.len())
            }
        }
    }
}

/// Ingestion entry points of the transaction buffer.
pub trait TxBuffer: Send + Sync {
    fn add_remote_tx(&self, txi: Txi);

    fn add_remote_txs(&self, sequencer: Sequencer, txs: Vec<Tx>);
}

impl TxBuffer for mpsc::UnboundedSender<TxBufferMessage> {
    fn add_remote_tx(&self, txi: Txi) {
        if let Err(err) = self.send(TxBufferMessage::RemoteTx(txi)) {
            warn!("failed to send remote tx to buffer: {err}");
        }
    }

    fn add_remote_txs(&self, sequencer: Sequencer, txs: Vec<Tx>) {
        if let Err(err) = self.send(TxBufferMessage::RemoteTxs { sequencer, txs }) {
            warn!("failed to send remote txs to buffer: {err}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundP2pRequest {
    SendToPeer { peer_id: String, message: Message },
    Broadcast(Message),
}

#[async_trait::async_trait]
pub trait P2pRequestSource<T>: Send {
    async fn recv(&mut self) -> Option<T>;
}

#[async_trait::async_trait]
impl<T: Send + 'static> P2pRequestSource<T> for mpsc::UnboundedReceiver<T> {
    async fn recv(&mut self) -> Option<T> {
        mpsc::UnboundedReceiver::recv(self).await
    }
}
