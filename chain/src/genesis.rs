use containers::{Address, Hash, Sequencer};

/// Deterministic genesis sequencer shared by every node of a network.
pub fn default_genesis() -> Sequencer {
    Sequencer {
        hash: Hash::digest(b"og genesis"),
        parents: Vec::new(),
        issuer: Address::default(),
        account_nonce: 0,
        id: 0,
    }
}
