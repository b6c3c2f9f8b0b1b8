use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chain::builder::ChainBuilder;
use chain::config::PROTOCOL_V1;
use chain::genesis::default_genesis;
use chain::{Dag, MemoryDag, MemoryTxPool, NodeStatusProvider, ProtocolLimits};
use clap::Parser;
use containers::Txi;
use networking::handler::IncomingMessageHandler;
use networking::network::{LocalSwitchboard, NetworkHandle, NetworkService, NetworkServiceConfig};
use networking::status::SyncStatus;
use networking::sync::{
    CatchupSyncer, HeaderFirstDownloader, PeerManager, SyncConfig, SyncerConfig, SyncerHandle,
    SyncerStatus,
};
use networking::types::{OutboundP2pRequest, TxBufferMessage};
use parking_lot::Mutex;
use tokio::time::{MissedTickBehavior, interval};
use tokio::{sync::mpsc, task};
use tracing::{debug, error, info, trace};

#[derive(Parser, Debug)]
struct Args {
    /// Nodes in the local network, the first one holds the seeded chain.
    #[arg(short, long, default_value_t = 3)]
    nodes: usize,

    /// Height of the seeded chain.
    #[arg(long, default_value_t = 64)]
    height: u64,

    #[arg(long, default_value_t = 2)]
    txs_per_sequencer: usize,

    /// YAML sync config; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 1_000)]
    status_interval_ms: u64,

    /// Give up if the network has not converged by then.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

struct Node {
    id: String,
    dag: Arc<MemoryDag>,
    tx_pool: Arc<MemoryTxPool>,
    peers: Arc<Mutex<PeerManager>>,
    syncer: Arc<CatchupSyncer>,
    syncer_handle: SyncerHandle,
}

impl Node {
    fn status(&self) -> SyncStatus {
        SyncStatus::collect(
            &self.id,
            &self.syncer,
            self.peers.as_ref(),
            self.dag.as_ref(),
            self.tx_pool.as_ref(),
        )
    }
}

fn seed_chain(dag: &MemoryDag, height: u64, txs_per_sequencer: usize) -> Result<()> {
    let mut builder = ChainBuilder::new(dag.latest_sequencer());
    for (sequencer, txs) in builder.blocks(height, txs_per_sequencer) {
        dag.push_sequencer(sequencer, txs)?;
    }
    Ok(())
}

fn spawn_node(
    id: String,
    dag: Arc<MemoryDag>,
    bootstrap_node: bool,
    config: &SyncConfig,
    switchboard: &LocalSwitchboard,
) -> Node {
    let (outbound_p2p_sender, outbound_p2p_receiver) =
        mpsc::unbounded_channel::<OutboundP2pRequest>();
    let (tx_buffer_sender, tx_buffer_receiver) = mpsc::unbounded_channel::<TxBufferMessage>();

    let limits = ProtocolLimits::for_version(PROTOCOL_V1);
    let tx_pool = Arc::new(MemoryTxPool::new());
    let peers = Arc::new(Mutex::new(PeerManager::new()));
    let hub = Arc::new(NetworkHandle::new(outbound_p2p_sender, peers.clone()));

    let downloader = Arc::new(HeaderFirstDownloader::new(
        dag.clone(),
        hub.clone(),
        limits,
        config.downloader.clone(),
    ));
    let handler = Arc::new(IncomingMessageHandler::new(
        dag.clone(),
        tx_pool.clone(),
        Arc::new(tx_buffer_sender),
        hub,
        downloader.clone(),
        limits,
    ));

    let syncer = Arc::new(CatchupSyncer::new(
        SyncerConfig {
            bootstrap_node,
            ..config.syncer.clone()
        },
        peers.clone(),
        dag.clone(),
        downloader,
    ));
    let syncer_handle = syncer.start();
    syncer_handle.enable(true);

    let mut network_service = NetworkService::new(
        Arc::new(NetworkServiceConfig::new(id.clone())),
        switchboard.clone(),
        peers.clone(),
        outbound_p2p_receiver,
        handler,
        dag.clone(),
    )
    .with_syncer(syncer_handle.clone());

    task::spawn({
        let id = id.clone();
        async move {
            if let Err(err) = network_service.start().await {
                error!(node = %id, %err, "Network service exited with error");
            }
        }
    });

    task::spawn(run_tx_buffer(
        id.clone(),
        tx_buffer_receiver,
        syncer.clone(),
        dag.clone(),
        tx_pool.clone(),
    ));

    Node {
        id,
        dag,
        tx_pool,
        peers,
        syncer,
        syncer_handle,
    }
}

/// Minimal transaction buffer: caches remote items in the pool unless the
/// node is too far behind for them to be useful.
async fn run_tx_buffer(
    node_id: String,
    mut receiver: mpsc::UnboundedReceiver<TxBufferMessage>,
    syncer: Arc<CatchupSyncer>,
    dag: Arc<MemoryDag>,
    tx_pool: Arc<MemoryTxPool>,
) {
    while let Some(message) = receiver.recv().await {
        if !syncer.cache_new_tx_enabled() {
            trace!(node = %node_id, %message, "Dropping remote item while catching up");
            continue;
        }

        match message {
            TxBufferMessage::RemoteTx(txi) => {
                if dag.get_tx(&txi.hash()).is_none() {
                    tx_pool.add(txi);
                }
            }
            TxBufferMessage::RemoteTxs { sequencer, txs } => {
                debug!(node = %node_id, id = sequencer.id, count = txs.len(), "Caching remote txs");
                for tx in txs {
                    tx_pool.add(Txi::Tx(tx));
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.nodes < 2 {
        bail!("a sync network needs at least two nodes");
    }

    let config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    info!(?config, "Loaded sync config");

    let switchboard = LocalSwitchboard::new();
    let genesis = default_genesis();

    let mut nodes = Vec::with_capacity(args.nodes);
    for index in 0..args.nodes {
        let dag = Arc::new(MemoryDag::new(genesis.clone()));
        let bootstrap_node = index == 0;
        if bootstrap_node {
            seed_chain(&dag, args.height, args.txs_per_sequencer)?;
        }
        nodes.push(spawn_node(
            format!("node-{index}"),
            dag,
            bootstrap_node,
            &config,
            &switchboard,
        ));
    }

    let target = args.height;
    info!(nodes = args.nodes, target, "Local network started");

    let mut status_interval = interval(Duration::from_millis(args.status_interval_ms));
    status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout_secs));
    tokio::pin!(deadline);

    let synced = loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let mut converged = true;
                for node in &nodes {
                    let status = node.status();
                    info!(status = %serde_json::to_string(&status)?, "Sync status");
                    converged &= node.dag.height() == target
                        && node.syncer.work_state() == SyncerStatus::Stopped;
                }
                if converged {
                    break true;
                }
            }
            _ = &mut deadline => break false,
        }
    };

    for node in &nodes {
        node.syncer_handle.stop();
    }

    if !synced {
        bail!("network did not converge on height {target} within {}s", args.timeout_secs);
    }
    info!(target, "All nodes synced");
    Ok(())
}
