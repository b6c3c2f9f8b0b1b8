//! In-memory ledger used by the node binary and by tests.
//!
//! Sequencers are indexed by hash and by id; the transactions each sequencer
//! confirms are grouped under its id.
use std::collections::{BTreeMap, HashMap};

use containers::{Hash, NodeStatus, Sequencer, Tx, Txi};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::PROTOCOL_V1;
use crate::dag::{ChainError, Dag, NodeStatusProvider, TxPool};

#[derive(Debug, Default)]
struct DagState {
    /// Every committed item, indexed by hash
    items: HashMap<Hash, Txi>,

    /// Canonical sequencer chain, indexed by id
    sequencers: BTreeMap<u64, Sequencer>,

    /// Transactions confirmed at each sequencer id
    txs_by_number: HashMap<u64, Vec<Tx>>,
}

#[derive(Debug)]
pub struct MemoryDag {
    network_id: u64,
    genesis: Sequencer,
    state: RwLock<DagState>,
}

impl MemoryDag {
    pub fn new(genesis: Sequencer) -> Self {
        Self::with_network_id(genesis, 1)
    }

    pub fn with_network_id(genesis: Sequencer, network_id: u64) -> Self {
        let mut state = DagState::default();
        state
            .items
            .insert(genesis.hash, Txi::Sequencer(genesis.clone()));
        state.sequencers.insert(genesis.id, genesis.clone());
        state.txs_by_number.insert(genesis.id, Vec::new());

        Self {
            network_id,
            genesis,
            state: RwLock::new(state),
        }
    }

    /// Number of committed items, sequencers included.
    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }
}

impl Dag for MemoryDag {
    fn get_tx(&self, hash: &Hash) -> Option<Txi> {
        self.state.read().items.get(hash).cloned()
    }

    fn get_sequencer(&self, hash: &Hash, id: u64) -> Option<Sequencer> {
        self.state
            .read()
            .sequencers
            .get(&id)
            .filter(|seq| seq.hash == *hash)
            .cloned()
    }

    fn get_sequencer_by_hash(&self, hash: &Hash) -> Option<Sequencer> {
        match self.state.read().items.get(hash) {
            Some(Txi::Sequencer(seq)) => Some(seq.clone()),
            _ => None,
        }
    }

    fn get_sequencer_by_id(&self, id: u64) -> Option<Sequencer> {
        self.state.read().sequencers.get(&id).cloned()
    }

    fn get_txs_by_number(&self, id: u64) -> Vec<Tx> {
        self.state
            .read()
            .txs_by_number
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn latest_sequencer(&self) -> Sequencer {
        self.state
            .read()
            .sequencers
            .last_key_value()
            .map(|(_, seq)| seq.clone())
            .unwrap_or_else(|| self.genesis.clone())
    }

    fn genesis(&self) -> Sequencer {
        self.genesis.clone()
    }

    fn push_sequencer(&self, sequencer: Sequencer, txs: Vec<Tx>) -> Result<(), ChainError> {
        let mut state = self.state.write();

        let latest = state
            .sequencers
            .last_key_value()
            .map(|(_, seq)| seq)
            .unwrap_or(&self.genesis);

        let expected = latest.id + 1;
        if sequencer.id != expected {
            return Err(ChainError::NonContiguous {
                expected,
                got: sequencer.id,
            });
        }
        if !sequencer.parents.contains(&latest.hash) {
            return Err(ChainError::UnknownParent(latest.hash));
        }
        if state.items.contains_key(&sequencer.hash) {
            return Err(ChainError::Duplicate(sequencer.hash));
        }
        if let Some(dup) = txs.iter().find(|tx| state.items.contains_key(&tx.hash)) {
            return Err(ChainError::Duplicate(dup.hash));
        }

        debug!(
            id = sequencer.id,
            hash = %sequencer.hash.short(),
            num_txs = txs.len(),
            "Committed sequencer"
        );

        for tx in &txs {
            state.items.insert(tx.hash, Txi::Tx(tx.clone()));
        }
        state
            .items
            .insert(sequencer.hash, Txi::Sequencer(sequencer.clone()));
        state.txs_by_number.insert(sequencer.id, txs);
        state.sequencers.insert(sequencer.id, sequencer);

        Ok(())
    }
}

impl NodeStatusProvider for MemoryDag {
    fn current_status(&self) -> NodeStatus {
        let latest = self.latest_sequencer();
        NodeStatus::new(
            PROTOCOL_V1,
            self.network_id,
            latest.hash,
            self.genesis.hash,
            latest.id,
        )
    }
}

/// Pending pool of items not yet confirmed by a sequencer.
#[derive(Debug, Default)]
pub struct MemoryTxPool {
    pending: RwLock<HashMap<Hash, Txi>>,
}

impl MemoryTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, txi: Txi) {
        self.pending.write().insert(txi.hash(), txi);
    }

    pub fn remove(&self, hash: &Hash) -> Option<Txi> {
        self.pending.write().remove(hash)
    }
}

impl TxPool for MemoryTxPool {
    fn get(&self, hash: &Hash) -> Option<Txi> {
        self.pending.read().get(hash).cloned()
    }

    fn tx_count(&self) -> usize {
        self.pending.read().len()
    }
}
