//! Catch-up sync for the OG DAG node.
//!
//! This module brings a node that has fallen behind its peers back to the
//! network's latest sequencer. It includes:
//!
//! - **Peer Manager**: Tracks connected peers and the heads they announce
//! - **Downloader**: Fetches sequencer headers, then bodies, and commits them
//! - **Catch-up Syncer**: Decides when to run a download cycle and publishes
//!   its coarse work state
//!
//! ## Architecture
//!
//! The syncer is driven by one event loop:
//! 1. A timer tick or a newly connected peer triggers a cycle (when enabled)
//! 2. The cycle asks the peer registry for the best peer
//! 3. The downloader pulls headers and bodies from that peer
//! 4. The message handler routes the peer's responses back to the downloader
//! 5. Once the gap is closed the syncer returns to `Stopped`
//!
//! ## State Machine
//!
//! - **STOPPED**: Not behind the best peer, or never started
//! - **STARTED**: A catch-up cycle is closing the gap
pub mod catchup;
pub mod config;
pub mod downloader;
pub mod peer_manager;
pub mod states;

pub use catchup::{CatchupSyncer, SyncError, SyncerCommand, SyncerHandle};
pub use config::*;
pub use downloader::{Downloader, DownloaderError, FetchKind, HeaderFirstDownloader, SyncMode};
pub use peer_manager::{PeerHead, PeerManager, SyncPeer};
pub use states::SyncerStatus;
