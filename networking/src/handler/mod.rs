//! Incoming sync message handler.
//!
//! Serves peer requests from local storage and routes peer responses to the
//! local collaborators: the downloader, the transaction buffer and the peer
//! registry. The handler keeps no state of its own, so messages from
//! different peers may be handled concurrently.
//!
//! Malformed or empty input is logged and dropped; nothing here ever reports
//! an error back to the peer.
mod headers;

use std::sync::Arc;

use chain::{Dag, ProtocolLimits, TxPool};
use containers::{
    BodiesRequest, BodiesResponse, HeadAnnouncement, HeaderQuery, HeaderResponse, Sequencer,
    SyncRequest, SyncResponse, Tx, Txi, TxsRequest, TxsResponse,
};
use tracing::{debug, trace, warn};

pub use headers::{HeaderScan, TraversalAnomaly, scan_headers};

use crate::message::{Message, MessageType, decode_value, encode_value};
use crate::sync::Downloader;
use crate::types::{Hub, TxBuffer};

pub struct IncomingMessageHandler {
    dag: Arc<dyn Dag>,
    tx_pool: Arc<dyn TxPool>,
    tx_buffer: Arc<dyn TxBuffer>,
    hub: Arc<dyn Hub>,
    downloader: Arc<dyn Downloader>,
    limits: ProtocolLimits,
}

impl IncomingMessageHandler {
    pub fn new(
        dag: Arc<dyn Dag>,
        tx_pool: Arc<dyn TxPool>,
        tx_buffer: Arc<dyn TxBuffer>,
        hub: Arc<dyn Hub>,
        downloader: Arc<dyn Downloader>,
        limits: ProtocolLimits,
    ) -> Self {
        Self {
            dag,
            tx_pool,
            tx_buffer,
            hub,
            downloader,
            limits,
        }
    }

    /// Dispatch one decoded message from `peer_id`.
    pub fn handle(&self, peer_id: &str, message: Message) {
        trace!(peer = peer_id, %message, "Handling message");

        match message {
            Message::Ping => self.handle_ping(peer_id),
            Message::Pong => self.handle_pong(peer_id),
            Message::FetchByHashRequest(request) => {
                self.handle_fetch_by_hash_request(peer_id, request)
            }
            Message::FetchByHashResponse(response) => {
                self.handle_fetch_by_hash_response(peer_id, response)
            }
            Message::SequencerHeader(head) => self.handle_sequencer_header(peer_id, head),
            Message::BodiesRequest(request) => self.handle_bodies_request(peer_id, request),
            Message::BodiesResponse(response) => self.handle_bodies_response(peer_id, response),
            Message::TxsRequest(request) => self.handle_txs_request(peer_id, request),
            Message::TxsResponse(response) => self.handle_txs_response(peer_id, response),
            Message::HeaderRequest(query) => self.handle_header_request(peer_id, query),
            Message::HeaderResponse(response) => self.handle_header_response(peer_id, response),
        }
    }

    pub fn handle_fetch_by_hash_request(&self, peer_id: &str, request: SyncRequest) {
        if request.hashes.is_empty() {
            debug!(peer = peer_id, "Empty fetch-by-hash request");
            return;
        }

        let mut response = SyncResponse::default();
        for hash in &request.hashes {
            match self.tx_pool.get(hash).or_else(|| self.dag.get_tx(hash)) {
                Some(Txi::Tx(tx)) => response.txs.push(tx),
                Some(Txi::Sequencer(seq)) => response.sequencers.push(seq),
                None => {}
            }
        }

        debug!(peer = peer_id, %response, "Sending fetch-by-hash response");
        self.hub
            .send_to_peer(peer_id, Message::FetchByHashResponse(response));
    }

    pub fn handle_fetch_by_hash_response(&self, peer_id: &str, response: SyncResponse) {
        if response.is_empty() {
            debug!(peer = peer_id, "Empty fetch-by-hash response");
            return;
        }

        debug!(peer = peer_id, %response, "Received fetch-by-hash response");
        for tx in response.txs {
            self.tx_buffer.add_remote_tx(Txi::Tx(tx));
        }
        for seq in response.sequencers {
            self.tx_buffer.add_remote_tx(Txi::Sequencer(seq));
        }
    }

    /// Run the header range scan for `query`, logging any anomaly against `peer_id`.
    pub fn collect_headers(&self, query: &HeaderQuery, peer_id: &str) -> HeaderScan {
        let scan = scan_headers(self.dag.as_ref(), &self.limits, query);
        if let Some(anomaly) = &scan.anomaly {
            match anomaly {
                TraversalAnomaly::SkipOverflow { .. } => {
                    warn!(peer = peer_id, %anomaly, "Header request skip overflow attack");
                }
                TraversalAnomaly::AncestorMismatch { .. } => {
                    warn!(peer = peer_id, %anomaly, "Chain changed during header scan");
                }
            }
        }
        scan
    }

    pub fn handle_header_request(&self, peer_id: &str, query: HeaderQuery) {
        debug!(
            peer = peer_id,
            hash_mode = query.is_hash_mode(),
            number = query.origin.number,
            amount = query.amount,
            skip = query.skip,
            reverse = query.reverse,
            "Received header request"
        );

        let scan = self.collect_headers(&query, peer_id);
        debug!(peer = peer_id, count = scan.headers.len(), "Sending header response");
        self.hub.send_to_peer(
            peer_id,
            Message::HeaderResponse(HeaderResponse {
                sequencers: scan.headers,
            }),
        );
    }

    pub fn handle_header_response(&self, peer_id: &str, response: HeaderResponse) {
        let headers: Vec<_> = response.sequencers.iter().map(Sequencer::header).collect();
        // A single header answers a targeted lookup; anything else is a batch.
        let filtered = headers.len() == 1;
        debug!(peer = peer_id, count = headers.len(), filtered, "Received header response");

        if let Err(err) = self.downloader.deliver_headers(peer_id, headers) {
            debug!(peer = peer_id, %err, "Failed to deliver headers");
        }
    }

    pub fn handle_bodies_request(&self, peer_id: &str, request: BodiesRequest) {
        debug!(peer = peer_id, count = request.sequencer_hashes.len(), "Received bodies request");

        let mut response = BodiesResponse::default();
        let mut bytes = 0usize;

        for hash in &request.sequencer_hashes {
            let Some(sequencer) = self.dag.get_sequencer_by_hash(hash) else {
                debug!(peer = peer_id, %hash, "Requested sequencer not found");
                break;
            };
            if bytes >= self.limits.soft_response_limit {
                debug!(peer = peer_id, bytes, "Reached soft response limit");
                break;
            }
            if response.bodies.len() >= self.limits.max_block_fetch {
                debug!(peer = peer_id, max = self.limits.max_block_fetch, "Reached max block fetch");
                break;
            }

            let txs = self.dag.get_txs_by_number(sequencer.id);
            let body = TxsResponse {
                sequencer: Some(sequencer),
                txs,
            };
            let data = match encode_value(&body) {
                Ok(data) => data,
                Err(err) => {
                    warn!(peer = peer_id, %err, "Failed to encode body");
                    break;
                }
            };
            bytes += data.len();
            response.bodies.push(data);
        }

        debug!(peer = peer_id, count = response.bodies.len(), bytes, "Sending bodies response");
        self.hub.send_to_peer(peer_id, Message::BodiesResponse(response));
    }

    /// Deliver the decodable prefix of the bodies to the downloader.
    pub fn handle_bodies_response(&self, peer_id: &str, response: BodiesResponse) {
        let mut transactions: Vec<Vec<Tx>> = Vec::with_capacity(response.bodies.len());
        let mut sequencers = Vec::with_capacity(response.bodies.len());

        for data in &response.bodies {
            let body: TxsResponse = match decode_value(MessageType::BodiesResponse, data) {
                Ok(body) => body,
                Err(err) => {
                    warn!(peer = peer_id, %err, "Body decode error");
                    break;
                }
            };
            let Some(sequencer) = body.sequencer else {
                warn!(peer = peer_id, "Body without sequencer");
                break;
            };
            transactions.push(body.txs);
            sequencers.push(sequencer);
        }

        debug!(
            peer = peer_id,
            bodies = response.bodies.len(),
            delivered = sequencers.len(),
            "Received bodies response"
        );
        if let Err(err) = self
            .downloader
            .deliver_bodies(peer_id, transactions, sequencers)
        {
            debug!(peer = peer_id, %err, "Failed to deliver bodies");
        }
    }

    pub fn handle_txs_request(&self, peer_id: &str, request: TxsRequest) {
        debug!(peer = peer_id, id = request.id, "Received txs request");

        let sequencer = match request.sequencer_hash {
            Some(hash) if request.id != 0 => self.dag.get_sequencer(&hash, request.id),
            _ => self.dag.get_sequencer_by_id(request.id),
        };

        let response = match sequencer {
            Some(sequencer) => TxsResponse {
                txs: self.dag.get_txs_by_number(sequencer.id),
                sequencer: Some(sequencer),
            },
            None => {
                warn!(peer = peer_id, id = request.id, hash = ?request.sequencer_hash, "Sequencer was not found for request");
                TxsResponse::default()
            }
        };

        debug!(peer = peer_id, count = response.txs.len(), "Sending txs response");
        self.hub.send_to_peer(peer_id, Message::TxsResponse(response));
    }

    pub fn handle_txs_response(&self, peer_id: &str, response: TxsResponse) {
        let Some(sequencer) = response.sequencer else {
            warn!(peer = peer_id, "Got txs response without sequencer");
            return;
        };

        let latest = self.dag.latest_sequencer();
        debug!(
            peer = peer_id,
            id = sequencer.id,
            latest = latest.id,
            count = response.txs.len(),
            "Received txs response"
        );
        if sequencer.id > latest.id {
            self.tx_buffer.add_remote_txs(sequencer, response.txs);
        }
    }

    /// Record the announced head. Fetching is left to the syncer.
    pub fn handle_sequencer_header(&self, peer_id: &str, head: HeadAnnouncement) {
        let Some(hash) = head.hash else {
            trace!(peer = peer_id, "Head announcement without hash");
            return;
        };

        debug!(peer = peer_id, %hash, number = head.number, "Peer head announced");
        self.hub.set_peer_head(peer_id, hash, head.number);
    }

    pub fn handle_ping(&self, peer_id: &str) {
        debug!(peer = peer_id, "Received ping, responding with pong");
        self.hub.send_to_peer(peer_id, Message::Pong);
    }

    pub fn handle_pong(&self, peer_id: &str) {
        debug!(peer = peer_id, "Received pong");
    }
}

#[cfg(test)]
mod tests;
