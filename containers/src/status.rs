use crate::Hash;
use serde::{Deserialize, Serialize};

/// What a node reports about its own chain.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    pub protocol_version: u32,
    pub network_id: u64,
    pub current_block: Hash,
    pub genesis_block: Hash,
    pub current_id: u64,
}

impl NodeStatus {
    pub fn new(protocol_version: u32, network_id: u64, current_block: Hash, genesis_block: Hash, current_id: u64) -> Self {
        Self {
            protocol_version,
            network_id,
            current_block,
            genesis_block,
            current_id,
        }
    }
}
