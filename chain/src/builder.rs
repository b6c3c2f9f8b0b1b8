//! Deterministic chain fabrication for seeding local networks and tests.
use containers::{Address, Hash, Sequencer, Tx};

/// Extends a sequencer chain one height at a time.
///
/// Every sequencer references the previous one plus the transactions it
/// confirms; hashes are derived from the parent hash and position so two
/// builders started from the same head produce the same chain.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    head: Sequencer,
    issuer: Address,
    nonce: u64,
}

impl ChainBuilder {
    pub fn new(head: Sequencer) -> Self {
        Self {
            head,
            issuer: Address([0x11; 20]),
            nonce: 0,
        }
    }

    pub fn head(&self) -> &Sequencer {
        &self.head
    }

    /// Produce the next sequencer together with `num_txs` transactions.
    pub fn next_block(&mut self, num_txs: usize) -> (Sequencer, Vec<Tx>) {
        let id = self.head.id + 1;
        let parent = self.head.hash;

        let txs: Vec<Tx> = (0..num_txs)
            .map(|i| {
                self.nonce += 1;
                Tx {
                    hash: Hash::digest(format!("tx:{parent}:{id}:{i}")),
                    parents: vec![parent],
                    from: self.issuer,
                    account_nonce: self.nonce,
                    value: i as u64,
                    data: Vec::new(),
                }
            })
            .collect();

        let mut parents = vec![parent];
        parents.extend(txs.iter().map(|tx| tx.hash));

        self.nonce += 1;
        let sequencer = Sequencer {
            hash: Hash::digest(format!("seq:{parent}:{id}")),
            parents,
            issuer: self.issuer,
            account_nonce: self.nonce,
            id,
        };

        self.head = sequencer.clone();
        (sequencer, txs)
    }

    /// Produce `count` consecutive heights.
    pub fn blocks(&mut self, count: u64, txs_per_block: usize) -> Vec<(Sequencer, Vec<Tx>)> {
        (0..count).map(|_| self.next_block(txs_per_block)).collect()
    }
}
