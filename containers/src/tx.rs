use crate::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An unordered DAG item referencing parent transactions.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tx {
    pub hash: Hash,
    pub parents: Vec<Hash>,
    pub from: Address,
    pub account_nonce: u64,
    pub value: u64,
    pub data: Vec<u8>,
}

/// A checkpoint that imposes a total order over the transactions it confirms.
///
/// `id` doubles as the sequencer height: it is unique and strictly increasing
/// along the canonical chain.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sequencer {
    pub hash: Hash,
    pub parents: Vec<Hash>,
    pub issuer: Address,
    pub account_nonce: u64,
    pub id: u64,
}

impl Sequencer {
    pub fn height(&self) -> u64 {
        self.id
    }

    pub fn header(&self) -> SequencerHeader {
        SequencerHeader {
            hash: self.hash,
            parents: self.parents.clone(),
            height: self.id,
            issuer: self.issuer,
            account_nonce: self.account_nonce,
            id: self.id,
        }
    }
}

/// Header projection of a [`Sequencer`], as handed to the downloader.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequencerHeader {
    pub hash: Hash,
    pub parents: Vec<Hash>,
    pub height: u64,
    pub issuer: Address,
    pub account_nonce: u64,
    pub id: u64,
}

impl From<&Sequencer> for SequencerHeader {
    fn from(sequencer: &Sequencer) -> Self {
        sequencer.header()
    }
}

/// Any item that can live in the DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Txi {
    Tx(Tx),
    Sequencer(Sequencer),
}

impl Txi {
    pub fn hash(&self) -> Hash {
        match self {
            Txi::Tx(tx) => tx.hash,
            Txi::Sequencer(seq) => seq.hash,
        }
    }

    pub fn parents(&self) -> &[Hash] {
        match self {
            Txi::Tx(tx) => &tx.parents,
            Txi::Sequencer(seq) => &seq.parents,
        }
    }
}

impl From<Tx> for Txi {
    fn from(tx: Tx) -> Self {
        Txi::Tx(tx)
    }
}

impl From<Sequencer> for Txi {
    fn from(seq: Sequencer) -> Self {
        Txi::Sequencer(seq)
    }
}

impl fmt::Display for Txi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Txi::Tx(tx) => write!(f, "Tx(hash={}, nonce={})", tx.hash.short(), tx.account_nonce),
            Txi::Sequencer(seq) => write!(f, "Sq(hash={}, id={})", seq.hash.short(), seq.id),
        }
    }
}
