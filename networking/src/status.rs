//! Diagnostic sync status, as served to an operator dashboard.
use chain::{NodeStatusProvider, TxPool};
use serde::{Deserialize, Serialize};

use crate::sync::CatchupSyncer;
use crate::types::PeerProvider;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub id: String,
    pub sync_mode: String,
    pub catchup_syncer_status: String,
    pub catchup_syncer_enabled: bool,
    pub height: u64,
    pub latest_height: u64,
    pub best_peer: String,
    pub error: String,
    pub tx_count: usize,
}

impl SyncStatus {
    /// Snapshot the node's sync state.
    ///
    /// A failed best-peer lookup is reported in `error`; otherwise `error`
    /// carries the last failed catch-up cycle, if any.
    pub fn collect(
        id: &str,
        syncer: &CatchupSyncer,
        peers: &dyn PeerProvider,
        node_status: &dyn NodeStatusProvider,
        tx_pool: &dyn TxPool,
    ) -> Self {
        let mut status = SyncStatus {
            id: id.to_string(),
            sync_mode: syncer.config().sync_mode.to_string(),
            catchup_syncer_status: syncer.work_state().to_string(),
            catchup_syncer_enabled: syncer.is_enabled(),
            height: node_status.height(),
            tx_count: tx_pool.tx_count(),
            ..SyncStatus::default()
        };

        match peers.best_peer_info() {
            Ok(best) => {
                status.latest_height = best.head_height;
                status.best_peer = best.peer_id;
                if let Some(err) = syncer.last_error() {
                    status.error = err.to_string();
                }
            }
            Err(err) => status.error = err.to_string(),
        }

        status
    }
}
