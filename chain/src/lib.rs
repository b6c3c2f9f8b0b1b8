pub mod builder;
pub mod config;
pub mod dag;
pub mod genesis;
pub mod memory;

pub use config::{ProtocolLimits, PROTOCOL_V1_LIMITS};
pub use dag::{ChainError, Dag, NodeStatusProvider, TxPool};
pub use memory::{MemoryDag, MemoryTxPool};
