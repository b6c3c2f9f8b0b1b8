//! Header-first chain downloader.
//!
//! Catches the local chain up to a peer's announced head in two phases per
//! round: first a contiguous run of sequencer headers by number, then the
//! bodies for those headers in chunks. Every committed sequencer goes through
//! [`Dag::push_sequencer`], so the ledger only ever grows by whole heights.
//!
//! ## Request/Response Matching
//!
//! Responses arrive through the message handler, not through the future that
//! sent the request. The downloader keeps at most one outstanding fetch and
//! hands the matching response over a oneshot channel. Responses from another
//! peer, or of the wrong kind, are rejected as unrequested.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chain::{ChainError, Dag, ProtocolLimits};
use containers::{BodiesRequest, Hash, HashOrNumber, HeaderQuery, Sequencer, SequencerHeader, Tx};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::config::DownloaderConfig;
use crate::message::Message;
use crate::types::Hub;

/// How much of a peer's chain to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Every sequencer together with the transactions it confirms.
    #[default]
    Full,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("FullSync"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DownloaderError {
    #[error("a synchronisation is already in progress")]
    Busy,
    #[error("downloader terminated")]
    Terminated,
    #[error("peer {peer_id} did not answer the {kind} request in time")]
    Timeout { peer_id: String, kind: FetchKind },
    #[error("unrequested {kind} delivery from {peer_id}")]
    Unrequested { peer_id: String, kind: FetchKind },
    #[error("peer {peer_id} returned no {kind}")]
    EmptyResponse { peer_id: String, kind: FetchKind },
    #[error("peer {peer_id} sent an invalid chain: {reason}")]
    InvalidChain { peer_id: String, reason: String },
    #[error("pending {0} request was cancelled")]
    Cancelled(FetchKind),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Which phase an outstanding request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Headers,
    Bodies,
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchKind::Headers => f.write_str("headers"),
            FetchKind::Bodies => f.write_str("bodies"),
        }
    }
}

/// Consumer of fetched chain segments.
///
/// Abstracts the download engine so the syncer and the message handler can be
/// tested against mocks.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Download from `peer_id` until the local chain reaches `head_height`.
    async fn synchronise(
        &self,
        peer_id: &str,
        head_hash: Hash,
        head_height: u64,
        mode: SyncMode,
    ) -> Result<(), DownloaderError>;

    fn deliver_headers(
        &self,
        peer_id: &str,
        headers: Vec<SequencerHeader>,
    ) -> Result<(), DownloaderError>;

    /// `txs[i]` belongs to `sequencers[i]`.
    fn deliver_bodies(
        &self,
        peer_id: &str,
        txs: Vec<Vec<Tx>>,
        sequencers: Vec<Sequencer>,
    ) -> Result<(), DownloaderError>;

    /// Abort the running synchronisation and refuse new ones.
    fn terminate(&self);
}

enum Delivery {
    Headers(Vec<SequencerHeader>),
    Bodies {
        txs: Vec<Vec<Tx>>,
        sequencers: Vec<Sequencer>,
    },
}

struct PendingFetch {
    peer_id: String,
    kind: FetchKind,
    respond_to: oneshot::Sender<Delivery>,
}

/// Clears the busy flag however `synchronise` exits.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct HeaderFirstDownloader {
    dag: Arc<dyn Dag>,
    hub: Arc<dyn Hub>,
    limits: ProtocolLimits,
    config: DownloaderConfig,

    /// The single outstanding request, if any
    pending: Mutex<Option<PendingFetch>>,

    /// Set while a synchronisation runs
    synchronising: AtomicBool,

    quit: watch::Sender<bool>,
}

impl HeaderFirstDownloader {
    pub fn new(
        dag: Arc<dyn Dag>,
        hub: Arc<dyn Hub>,
        limits: ProtocolLimits,
        config: DownloaderConfig,
    ) -> Self {
        let (quit, _) = watch::channel(false);
        Self {
            dag,
            hub,
            limits,
            config,
            pending: Mutex::new(None),
            synchronising: AtomicBool::new(false),
            quit,
        }
    }

    pub fn is_synchronising(&self) -> bool {
        self.synchronising.load(Ordering::Acquire)
    }

    async fn full_sync(
        &self,
        peer_id: &str,
        head_height: u64,
        quit: &mut watch::Receiver<bool>,
    ) -> Result<(), DownloaderError> {
        loop {
            let local = self.dag.latest_sequencer();
            if local.id >= head_height {
                return Ok(());
            }

            let amount = (head_height - local.id).min(self.limits.max_header_fetch as u64);
            let headers = self.fetch_headers(peer_id, &local, amount, quit).await?;
            self.fetch_bodies(peer_id, headers, quit).await?;
        }
    }

    /// Headers `local.id + 1 ..= local.id + amount`, checked to extend `local`.
    async fn fetch_headers(
        &self,
        peer_id: &str,
        local: &Sequencer,
        amount: u64,
        quit: &mut watch::Receiver<bool>,
    ) -> Result<Vec<SequencerHeader>, DownloaderError> {
        let query = HeaderQuery {
            origin: HashOrNumber::number(local.id + 1),
            amount,
            skip: 0,
            reverse: false,
        };
        debug!(peer = peer_id, from = local.id + 1, amount, "Requesting headers");

        let delivery = self
            .request(peer_id, Message::HeaderRequest(query), FetchKind::Headers, quit)
            .await?;
        let Delivery::Headers(headers) = delivery else {
            return Err(DownloaderError::Unrequested {
                peer_id: peer_id.to_string(),
                kind: FetchKind::Bodies,
            });
        };

        if headers.is_empty() {
            return Err(DownloaderError::EmptyResponse {
                peer_id: peer_id.to_string(),
                kind: FetchKind::Headers,
            });
        }

        let mut parent = local.hash;
        for (offset, header) in headers.iter().enumerate() {
            let expected = local.id + 1 + offset as u64;
            if header.height != expected {
                return Err(invalid_chain(
                    peer_id,
                    format!("header at height {} where {expected} was expected", header.height),
                ));
            }
            if !header.parents.contains(&parent) {
                return Err(invalid_chain(
                    peer_id,
                    format!("header {} does not reference its predecessor", header.hash),
                ));
            }
            parent = header.hash;
        }

        Ok(headers)
    }

    /// Fetch and commit the bodies of `headers`, in order.
    ///
    /// A peer may answer with a prefix of the requested bodies when it hits
    /// its byte budget; the rest is requested again.
    async fn fetch_bodies(
        &self,
        peer_id: &str,
        headers: Vec<SequencerHeader>,
        quit: &mut watch::Receiver<bool>,
    ) -> Result<(), DownloaderError> {
        let mut remaining: VecDeque<SequencerHeader> = headers.into();

        while !remaining.is_empty() {
            let sequencer_hashes: Vec<Hash> = remaining
                .iter()
                .take(self.limits.max_block_fetch)
                .map(|header| header.hash)
                .collect();
            debug!(peer = peer_id, count = sequencer_hashes.len(), "Requesting bodies");

            let request = Message::BodiesRequest(BodiesRequest { sequencer_hashes });
            let delivery = self.request(peer_id, request, FetchKind::Bodies, quit).await?;
            let Delivery::Bodies { txs, sequencers } = delivery else {
                return Err(DownloaderError::Unrequested {
                    peer_id: peer_id.to_string(),
                    kind: FetchKind::Headers,
                });
            };

            if sequencers.is_empty() {
                return Err(DownloaderError::EmptyResponse {
                    peer_id: peer_id.to_string(),
                    kind: FetchKind::Bodies,
                });
            }
            if txs.len() != sequencers.len() {
                return Err(invalid_chain(
                    peer_id,
                    format!("{} tx sets for {} sequencers", txs.len(), sequencers.len()),
                ));
            }

            for (sequencer, txs) in sequencers.into_iter().zip(txs) {
                let Some(header) = remaining.front() else {
                    return Err(invalid_chain(peer_id, "more bodies than requested".to_string()));
                };
                if sequencer.hash != header.hash || sequencer.id != header.height {
                    return Err(invalid_chain(
                        peer_id,
                        format!("body {} does not match header {}", sequencer.hash, header.hash),
                    ));
                }

                self.dag.push_sequencer(sequencer, txs)?;
                remaining.pop_front();
            }
        }

        Ok(())
    }

    async fn request(
        &self,
        peer_id: &str,
        message: Message,
        kind: FetchKind,
        quit: &mut watch::Receiver<bool>,
    ) -> Result<Delivery, DownloaderError> {
        let (respond_to, response) = oneshot::channel();
        *self.pending.lock() = Some(PendingFetch {
            peer_id: peer_id.to_string(),
            kind,
            respond_to,
        });

        self.hub.send_to_peer(peer_id, message);

        let result = tokio::select! {
            delivery = response => delivery.map_err(|_| DownloaderError::Cancelled(kind)),
            _ = tokio::time::sleep(self.config.request_timeout) => Err(DownloaderError::Timeout {
                peer_id: peer_id.to_string(),
                kind,
            }),
            _ = quit.changed() => Err(DownloaderError::Terminated),
        };

        self.pending.lock().take();
        result
    }

    fn deliver(&self, peer_id: &str, kind: FetchKind, delivery: Delivery) -> Result<(), DownloaderError> {
        let mut pending = self.pending.lock();
        match pending.take() {
            Some(fetch) if fetch.peer_id == peer_id && fetch.kind == kind => {
                // The requester may have timed out in the meantime.
                let _ = fetch.respond_to.send(delivery);
                Ok(())
            }
            other => {
                *pending = other;
                Err(DownloaderError::Unrequested {
                    peer_id: peer_id.to_string(),
                    kind,
                })
            }
        }
    }
}

#[async_trait::async_trait]
impl Downloader for HeaderFirstDownloader {
    async fn synchronise(
        &self,
        peer_id: &str,
        head_hash: Hash,
        head_height: u64,
        mode: SyncMode,
    ) -> Result<(), DownloaderError> {
        let mut quit = self.quit.subscribe();
        if *quit.borrow() {
            return Err(DownloaderError::Terminated);
        }
        if self.synchronising.swap(true, Ordering::AcqRel) {
            return Err(DownloaderError::Busy);
        }
        let _guard = SyncingGuard(&self.synchronising);

        let from = self.dag.latest_sequencer().id;
        info!(peer = peer_id, from, to = head_height, %mode, "Synchronising with peer");

        match mode {
            SyncMode::Full => self.full_sync(peer_id, head_height, &mut quit).await?,
        }

        let reached = self.dag.latest_sequencer();
        if reached.id == head_height && reached.hash != head_hash {
            warn!(
                peer = peer_id,
                height = head_height,
                announced = %head_hash,
                got = %reached.hash,
                "Peer head changed during synchronisation"
            );
        }
        info!(peer = peer_id, height = reached.id, "Synchronisation finished");

        Ok(())
    }

    fn deliver_headers(
        &self,
        peer_id: &str,
        headers: Vec<SequencerHeader>,
    ) -> Result<(), DownloaderError> {
        self.deliver(peer_id, FetchKind::Headers, Delivery::Headers(headers))
    }

    fn deliver_bodies(
        &self,
        peer_id: &str,
        txs: Vec<Vec<Tx>>,
        sequencers: Vec<Sequencer>,
    ) -> Result<(), DownloaderError> {
        self.deliver(peer_id, FetchKind::Bodies, Delivery::Bodies { txs, sequencers })
    }

    fn terminate(&self) {
        self.quit.send_replace(true);
        self.pending.lock().take();
        info!("Downloader terminated");
    }
}

fn invalid_chain(peer_id: &str, reason: String) -> DownloaderError {
    DownloaderError::InvalidChain {
        peer_id: peer_id.to_string(),
        reason,
    }
}
