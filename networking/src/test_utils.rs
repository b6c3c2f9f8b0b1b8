//! Mocks shared by the unit tests of this crate.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chain::builder::ChainBuilder;
use chain::genesis::default_genesis;
use chain::{Dag, MemoryDag, NodeStatusProvider};
use containers::{Hash, NodeStatus, Sequencer, SequencerHeader, Tx};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::message::Message;
use crate::sync::{Downloader, DownloaderError, SyncMode};
use crate::types::{BestPeer, Hub, PeerError, PeerProvider};

/// A ledger holding genesis plus `height` generated sequencers.
pub fn seeded_dag(height: u64, txs_per_block: usize) -> Arc<MemoryDag> {
    let dag = Arc::new(MemoryDag::new(default_genesis()));
    extend_dag(&dag, height, txs_per_block);
    dag
}

pub fn extend_dag(dag: &MemoryDag, count: u64, txs_per_block: usize) {
    let mut builder = ChainBuilder::new(dag.latest_sequencer());
    for (sequencer, txs) in builder.blocks(count, txs_per_block) {
        dag.push_sequencer(sequencer, txs).unwrap();
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

pub struct MockPeers {
    best: Mutex<Result<BestPeer, PeerError>>,
}

impl MockPeers {
    pub fn none() -> Self {
        Self {
            best: Mutex::new(Err(PeerError::NoPeers)),
        }
    }

    pub fn at(peer_id: &str, height: u64) -> Self {
        let peers = Self::none();
        peers.set(peer_id, height);
        peers
    }

    pub fn set(&self, peer_id: &str, height: u64) {
        *self.best.lock() = Ok(BestPeer {
            peer_id: peer_id.to_string(),
            head_hash: Hash::digest(format!("{peer_id}:{height}")),
            head_height: height,
        });
    }
}

impl PeerProvider for MockPeers {
    fn best_peer_info(&self) -> Result<BestPeer, PeerError> {
        self.best.lock().clone()
    }
}

#[derive(Default)]
pub struct MockNodeStatus {
    height: AtomicU64,
}

impl MockNodeStatus {
    pub fn at(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
        }
    }

    pub fn set(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn current_height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }
}

impl NodeStatusProvider for MockNodeStatus {
    fn current_status(&self) -> NodeStatus {
        NodeStatus::new(1, 1, Hash::ZERO, Hash::ZERO, self.height.load(Ordering::SeqCst))
    }
}

/// Downloader that jumps the node status straight to the requested head.
pub struct MockDownloader {
    node_status: Arc<MockNodeStatus>,
    gate: Option<Arc<Notify>>,
    failure: Mutex<Option<DownloaderError>>,
    pub synchronise_calls: Mutex<Vec<(String, u64)>>,
    pub delivered_headers: Mutex<Vec<(String, Vec<SequencerHeader>)>>,
    pub delivered_bodies: Mutex<Vec<(String, Vec<Vec<Tx>>, Vec<Sequencer>)>>,
    pub terminated: AtomicBool,
}

impl MockDownloader {
    pub fn new(node_status: Arc<MockNodeStatus>) -> Self {
        Self {
            node_status,
            gate: None,
            failure: Mutex::new(None),
            synchronise_calls: Mutex::new(Vec::new()),
            delivered_headers: Mutex::new(Vec::new()),
            delivered_bodies: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        }
    }

    /// Every `synchronise` waits for a permit on `gate` before finishing.
    pub fn gated(node_status: Arc<MockNodeStatus>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(node_status)
        }
    }

    pub fn fail_with(&self, err: DownloaderError) {
        *self.failure.lock() = Some(err);
    }

    pub fn call_count(&self) -> usize {
        self.synchronise_calls.lock().len()
    }
}

#[async_trait::async_trait]
impl Downloader for MockDownloader {
    async fn synchronise(
        &self,
        peer_id: &str,
        _head_hash: Hash,
        head_height: u64,
        _mode: SyncMode,
    ) -> Result<(), DownloaderError> {
        self.synchronise_calls
            .lock()
            .push((peer_id.to_string(), head_height));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }

        self.node_status.set(head_height);
        Ok(())
    }

    fn deliver_headers(
        &self,
        peer_id: &str,
        headers: Vec<SequencerHeader>,
    ) -> Result<(), DownloaderError> {
        self.delivered_headers
            .lock()
            .push((peer_id.to_string(), headers));
        Ok(())
    }

    fn deliver_bodies(
        &self,
        peer_id: &str,
        txs: Vec<Vec<Tx>>,
        sequencers: Vec<Sequencer>,
    ) -> Result<(), DownloaderError> {
        self.delivered_bodies
            .lock()
            .push((peer_id.to_string(), txs, sequencers));
        Ok(())
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Hub that records everything and optionally forwards direct sends.
#[derive(Default)]
pub struct RecordingHub {
    pub sent: Mutex<Vec<(String, Message)>>,
    pub broadcasts: Mutex<Vec<Message>>,
    pub heads: Mutex<Vec<(String, Hash, u64)>>,
    forward: Option<mpsc::UnboundedSender<(String, Message)>>,
}

impl RecordingHub {
    pub fn forwarding() -> (Self, mpsc::UnboundedReceiver<(String, Message)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let hub = Self {
            forward: Some(sender),
            ..Self::default()
        };
        (hub, receiver)
    }

    pub fn sent_messages(&self) -> Vec<(String, Message)> {
        self.sent.lock().clone()
    }
}

impl Hub for RecordingHub {
    fn send_to_peer(&self, peer_id: &str, message: Message) {
        if let Some(forward) = &self.forward {
            let _ = forward.send((peer_id.to_string(), message.clone()));
        }
        self.sent.lock().push((peer_id.to_string(), message));
    }

    fn broadcast_message(&self, message: Message) {
        self.broadcasts.lock().push(message);
    }

    fn set_peer_head(&self, peer_id: &str, hash: Hash, height: u64) {
        self.heads.lock().push((peer_id.to_string(), hash, height));
    }
}
