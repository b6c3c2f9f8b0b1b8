//! Payloads of the sync protocol.
//!
//! Each struct here is the body of one message kind; the envelope and the
//! integer tags live in the networking crate.

use crate::{Hash, Sequencer, Tx};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ask a peer for items by identity.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    pub hashes: Vec<Hash>,
}

/// Items a peer knew for a [`SyncRequest`]. Unknown hashes are simply absent.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    pub txs: Vec<Tx>,
    pub sequencers: Vec<Sequencer>,
}

impl SyncResponse {
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty() && self.sequencers.is_empty()
    }
}

impl fmt::Display for SyncResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txs: {}, seqs: {}", self.txs.len(), self.sequencers.len())
    }
}

/// Origin of a header range query.
///
/// A present, non-empty `hash` selects hash mode; otherwise `number` is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashOrNumber {
    pub hash: Option<Hash>,
    pub number: u64,
}

impl HashOrNumber {
    pub fn hash(hash: Hash) -> Self {
        Self {
            hash: Some(hash),
            number: 0,
        }
    }

    pub fn number(number: u64) -> Self {
        Self { hash: None, number }
    }
}

/// Paginated range scan over the sequencer chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderQuery {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl HeaderQuery {
    pub fn is_hash_mode(&self) -> bool {
        self.origin.hash.is_some_and(|hash| !hash.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderResponse {
    pub sequencers: Vec<Sequencer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BodiesRequest {
    pub sequencer_hashes: Vec<Hash>,
}

/// One encoded [`TxsResponse`] per requested sequencer.
pub type RawData = Vec<u8>;

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BodiesResponse {
    pub bodies: Vec<RawData>,
}

/// Full content of one sequencer height.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxsRequest {
    pub id: u64,
    pub sequencer_hash: Option<Hash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxsResponse {
    pub sequencer: Option<Sequencer>,
    pub txs: Vec<Tx>,
}

/// Gossiped whenever a peer's chain head advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeadAnnouncement {
    pub hash: Option<Hash>,
    pub number: u64,
}
