//! Ledger contract consumed by the sync core.
//!
//! The storage engine itself is an external collaborator; the sync handler and
//! the downloader only ever see it through these traits.
use containers::{Hash, NodeStatus, Sequencer, Tx, Txi};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("sequencer id {got} does not extend the chain, expected {expected}")]
    NonContiguous { expected: u64, got: u64 },
    #[error("sequencer does not reference the current head {0}")]
    UnknownParent(Hash),
    #[error("item {0} already stored")]
    Duplicate(Hash),
}

/// Committed DAG storage.
pub trait Dag: Send + Sync {
    /// Any committed item by hash.
    fn get_tx(&self, hash: &Hash) -> Option<Txi>;

    /// Sequencer with this hash at this id, `None` if either does not match.
    fn get_sequencer(&self, hash: &Hash, id: u64) -> Option<Sequencer>;

    fn get_sequencer_by_hash(&self, hash: &Hash) -> Option<Sequencer>;

    fn get_sequencer_by_id(&self, id: u64) -> Option<Sequencer>;

    /// Transactions confirmed by the sequencer at `id`.
    fn get_txs_by_number(&self, id: u64) -> Vec<Tx>;

    fn latest_sequencer(&self) -> Sequencer;

    fn genesis(&self) -> Sequencer;

    /// Commit a sequencer and the transactions it confirms.
    ///
    /// Atomic: on error nothing is written.
    fn push_sequencer(&self, sequencer: Sequencer, txs: Vec<Tx>) -> Result<(), ChainError>;
}

/// Pending (not yet sequenced) items.
pub trait TxPool: Send + Sync {
    fn get(&self, hash: &Hash) -> Option<Txi>;

    fn tx_count(&self) -> usize;
}

/// Reports this node's own head.
pub trait NodeStatusProvider: Send + Sync {
    fn current_status(&self) -> NodeStatus;

    fn height(&self) -> u64 {
        self.current_status().current_id
    }
}
