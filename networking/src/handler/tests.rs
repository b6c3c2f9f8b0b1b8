use std::io;
use std::sync::Arc;

use chain::{ChainError, Dag, MemoryDag, MemoryTxPool, ProtocolLimits};
use containers::{
    BodiesRequest, BodiesResponse, Hash, HashOrNumber, HeadAnnouncement, HeaderQuery,
    HeaderResponse, Sequencer, SyncRequest, SyncResponse, Tx, Txi, TxsRequest, TxsResponse,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio::sync::mpsc;

use super::{HeaderScan, IncomingMessageHandler, TraversalAnomaly, scan_headers};
use crate::message::{Message, MessageType, decode_value, encode_value};
use crate::test_utils::{MockDownloader, MockNodeStatus, RecordingHub, seeded_dag};
use crate::types::TxBufferMessage;

const PEER: &str = "peer-a";

struct Fixture {
    dag: Arc<MemoryDag>,
    pool: Arc<MemoryTxPool>,
    hub: Arc<RecordingHub>,
    downloader: Arc<MockDownloader>,
    buffered: mpsc::UnboundedReceiver<TxBufferMessage>,
    handler: IncomingMessageHandler,
}

fn fixture_with(dag: Arc<MemoryDag>, limits: ProtocolLimits) -> Fixture {
    let pool = Arc::new(MemoryTxPool::new());
    let hub = Arc::new(RecordingHub::default());
    let downloader = Arc::new(MockDownloader::new(Arc::new(MockNodeStatus::default())));
    let (tx_buffer, buffered) = mpsc::unbounded_channel();

    let handler = IncomingMessageHandler::new(
        dag.clone(),
        pool.clone(),
        Arc::new(tx_buffer),
        hub.clone(),
        downloader.clone(),
        limits,
    );

    Fixture {
        dag,
        pool,
        hub,
        downloader,
        buffered,
        handler,
    }
}

fn fixture(height: u64) -> Fixture {
    fixture_with(seeded_dag(height, 2), ProtocolLimits::default())
}

fn ids(scan: &HeaderScan) -> Vec<u64> {
    scan.headers.iter().map(|seq| seq.id).collect()
}

fn by_number(number: u64, amount: u64, skip: u64, reverse: bool) -> HeaderQuery {
    HeaderQuery {
        origin: HashOrNumber::number(number),
        amount,
        skip,
        reverse,
    }
}

fn by_hash(dag: &MemoryDag, number: u64, amount: u64, skip: u64, reverse: bool) -> HeaderQuery {
    let hash = dag.get_sequencer_by_id(number).unwrap().hash;
    HeaderQuery {
        origin: HashOrNumber::hash(hash),
        amount,
        skip,
        reverse,
    }
}

fn drain(receiver: &mut mpsc::UnboundedReceiver<TxBufferMessage>) -> Vec<TxBufferMessage> {
    let mut items = Vec::new();
    while let Ok(item) = receiver.try_recv() {
        items.push(item);
    }
    items
}

#[rstest]
#[case::forward(by_number(5, 3, 0, false), vec![5, 6, 7])]
#[case::forward_skip(by_number(0, 3, 1, false), vec![0, 2, 4])]
#[case::forward_runs_out(by_number(8, 5, 0, false), vec![8, 9, 10])]
#[case::reverse(by_number(10, 3, 0, true), vec![10, 9, 8])]
#[case::reverse_skip(by_number(9, 4, 2, true), vec![9, 6, 3, 0])]
#[case::reverse_underflow(by_number(1, 5, 5, true), vec![1])]
#[case::unknown_origin(by_number(11, 3, 0, false), vec![])]
#[case::zero_amount(by_number(3, 0, 0, false), vec![])]
#[case::reverse_max_skip(by_number(10, 5, u64::MAX, true), vec![10])]
#[case::forward_max_skip(by_number(10, 5, u64::MAX, false), vec![10])]
fn test_number_mode_traversal(#[case] query: HeaderQuery, #[case] expected: Vec<u64>) {
    let dag = seeded_dag(10, 0);
    let scan = scan_headers(dag.as_ref(), &ProtocolLimits::default(), &query);

    assert_eq!(ids(&scan), expected);
    assert_eq!(scan.anomaly, None);
}

#[rstest]
#[case::forward(3, 3, 0, false, vec![3, 4, 5])]
#[case::forward_skip(2, 3, 2, false, vec![2, 5, 8])]
#[case::forward_runs_out(9, 4, 0, false, vec![9, 10])]
#[case::reverse(6, 4, 0, true, vec![6, 5, 4, 3])]
#[case::reverse_skip(7, 5, 1, true, vec![7, 5, 3, 1])]
#[case::reverse_to_genesis(2, 5, 0, true, vec![2, 1, 0])]
#[case::reverse_max_skip(4, 3, u64::MAX, true, vec![4])]
fn test_hash_mode_traversal(
    #[case] origin: u64,
    #[case] amount: u64,
    #[case] skip: u64,
    #[case] reverse: bool,
    #[case] expected: Vec<u64>,
) {
    let dag = seeded_dag(10, 0);
    let query = by_hash(&dag, origin, amount, skip, reverse);
    let scan = scan_headers(dag.as_ref(), &ProtocolLimits::default(), &query);

    assert_eq!(ids(&scan), expected);
    assert_eq!(scan.anomaly, None);
}

#[test]
fn test_unknown_origin_hash_yields_nothing() {
    let dag = seeded_dag(3, 0);
    let query = HeaderQuery {
        origin: HashOrNumber::hash(Hash::digest(b"unknown")),
        amount: 3,
        skip: 0,
        reverse: false,
    };

    assert_eq!(scan_headers(dag.as_ref(), &ProtocolLimits::default(), &query), HeaderScan::default());
}

#[test]
fn test_zero_hash_falls_back_to_number_mode() {
    let dag = seeded_dag(5, 0);
    let query = HeaderQuery {
        origin: HashOrNumber {
            hash: Some(Hash::ZERO),
            number: 2,
        },
        amount: 2,
        skip: 0,
        reverse: false,
    };

    let scan = scan_headers(dag.as_ref(), &ProtocolLimits::default(), &query);
    assert_eq!(ids(&scan), vec![2, 3]);
}

#[test]
fn test_skip_overflow_is_flagged() {
    let f = fixture(10);
    let query = by_hash(&f.dag, 4, 5, u64::MAX, false);

    let scan = f.handler.collect_headers(&query, PEER);

    assert_eq!(ids(&scan), vec![4]);
    assert_eq!(
        scan.anomaly,
        Some(TraversalAnomaly::SkipOverflow {
            current: 4,
            skip: u64::MAX,
        })
    );
}

/// Ledger that resolves one extra hash to a sequencer off the canonical chain.
struct ForkedDag {
    inner: Arc<MemoryDag>,
    fork: Sequencer,
}

impl ForkedDag {
    fn at(inner: Arc<MemoryDag>, id: u64) -> Self {
        let parent = inner.get_sequencer_by_id(id - 1).unwrap();
        let fork = Sequencer {
            hash: Hash::digest(b"fork"),
            parents: vec![parent.hash],
            id,
            ..Default::default()
        };
        Self { inner, fork }
    }
}

impl Dag for ForkedDag {
    fn get_tx(&self, hash: &Hash) -> Option<Txi> {
        self.inner.get_tx(hash)
    }

    fn get_sequencer(&self, hash: &Hash, id: u64) -> Option<Sequencer> {
        self.inner.get_sequencer(hash, id)
    }

    fn get_sequencer_by_hash(&self, hash: &Hash) -> Option<Sequencer> {
        if *hash == self.fork.hash {
            return Some(self.fork.clone());
        }
        self.inner.get_sequencer_by_hash(hash)
    }

    fn get_sequencer_by_id(&self, id: u64) -> Option<Sequencer> {
        self.inner.get_sequencer_by_id(id)
    }

    fn get_txs_by_number(&self, id: u64) -> Vec<Tx> {
        self.inner.get_txs_by_number(id)
    }

    fn latest_sequencer(&self) -> Sequencer {
        self.inner.latest_sequencer()
    }

    fn genesis(&self) -> Sequencer {
        self.inner.genesis()
    }

    fn push_sequencer(&self, sequencer: Sequencer, txs: Vec<Tx>) -> Result<(), ChainError> {
        self.inner.push_sequencer(sequencer, txs)
    }
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn fork_query(dag: &ForkedDag) -> HeaderQuery {
    HeaderQuery {
        origin: HashOrNumber::hash(dag.fork.hash),
        amount: 5,
        skip: 0,
        reverse: false,
    }
}

#[test]
fn test_forward_hash_scan_stops_on_ancestor_mismatch() {
    let dag = ForkedDag::at(seeded_dag(10, 0), 3);
    let scan = scan_headers(&dag, &ProtocolLimits::default(), &fork_query(&dag));

    assert_eq!(ids(&scan), vec![3]);
    assert_eq!(
        scan.anomaly,
        Some(TraversalAnomaly::AncestorMismatch {
            number: 3,
            expected: Hash::digest(b"fork"),
        })
    );
}

#[test]
fn test_ancestor_mismatch_is_logged_against_peer() {
    let dag = Arc::new(ForkedDag::at(seeded_dag(10, 0), 3));
    let query = fork_query(&dag);
    let (tx_buffer, _buffered) = mpsc::unbounded_channel::<TxBufferMessage>();
    let handler = IncomingMessageHandler::new(
        dag,
        Arc::new(MemoryTxPool::new()),
        Arc::new(tx_buffer),
        Arc::new(RecordingHub::default()),
        Arc::new(MockDownloader::new(Arc::new(MockNodeStatus::default()))),
        ProtocolLimits::default(),
    );

    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let scan = tracing::subscriber::with_default(subscriber, || {
        handler.collect_headers(&query, PEER)
    });

    assert!(matches!(
        scan.anomaly,
        Some(TraversalAnomaly::AncestorMismatch { number: 3, .. })
    ));
    let output = logs.contents();
    assert!(output.contains("WARN"), "{output}");
    assert!(output.contains("Chain changed during header scan"), "{output}");
    assert!(output.contains(PEER), "{output}");
    assert!(output.contains("ancestor mismatch at 3"), "{output}");
}

#[test]
fn test_header_count_capped() {
    let dag = seeded_dag(300, 0);
    let limits = ProtocolLimits::default();
    let scan = scan_headers(dag.as_ref(), &limits, &by_number(0, 1_000, 0, false));

    assert_eq!(scan.headers.len(), limits.max_header_fetch);
    assert_eq!(scan.headers.last().map(|seq| seq.id), Some(191));
}

#[test]
fn test_header_bytes_capped() {
    let dag = seeded_dag(20, 0);
    let limits = ProtocolLimits {
        soft_response_limit: 1_200,
        est_header_size: 500,
        ..ProtocolLimits::default()
    };

    // 500, 1000, 1500: the third header crosses the soft limit.
    let scan = scan_headers(dag.as_ref(), &limits, &by_number(0, 10, 0, false));
    assert_eq!(ids(&scan), vec![0, 1, 2]);
}

#[test]
fn test_header_request_is_answered() {
    let f = fixture(10);
    f.handler
        .handle(PEER, Message::HeaderRequest(by_number(5, 3, 0, false)));

    let sent = f.hub.sent_messages();
    assert_eq!(sent.len(), 1);
    let (peer, Message::HeaderResponse(response)) = &sent[0] else {
        panic!("expected a header response, got {:?}", sent[0]);
    };
    assert_eq!(peer, PEER);
    let heights: Vec<u64> = response.sequencers.iter().map(|seq| seq.id).collect();
    assert_eq!(heights, vec![5, 6, 7]);
}

#[rstest]
#[case::batch(3)]
#[case::filtered(1)]
#[case::empty(0)]
fn test_header_response_is_delivered(#[case] count: u64) {
    let f = fixture(5);
    let sequencers: Vec<_> = (1..=count)
        .filter_map(|id| f.dag.get_sequencer_by_id(id))
        .collect();
    let expected: Vec<_> = sequencers.iter().map(|seq| seq.header()).collect();

    f.handler
        .handle(PEER, Message::HeaderResponse(HeaderResponse { sequencers }));

    assert_eq!(
        *f.downloader.delivered_headers.lock(),
        vec![(PEER.to_string(), expected)]
    );
}

#[test]
fn test_bodies_request_bundles_txs() {
    let f = fixture(5);
    let hashes = (1..=3)
        .map(|id| f.dag.get_sequencer_by_id(id).unwrap().hash)
        .collect();

    f.handler.handle(
        PEER,
        Message::BodiesRequest(BodiesRequest {
            sequencer_hashes: hashes,
        }),
    );

    let sent = f.hub.sent_messages();
    let (_, Message::BodiesResponse(response)) = &sent[0] else {
        panic!("expected a bodies response");
    };
    assert_eq!(response.bodies.len(), 3);
    for (offset, data) in response.bodies.iter().enumerate() {
        let body: TxsResponse = decode_value(MessageType::BodiesResponse, data).unwrap();
        let id = offset as u64 + 1;
        assert_eq!(body.sequencer, f.dag.get_sequencer_by_id(id));
        assert_eq!(body.txs, f.dag.get_txs_by_number(id));
    }
}

#[test]
fn test_bodies_request_stops_at_unknown_hash() {
    let f = fixture(5);
    let hashes = vec![
        f.dag.get_sequencer_by_id(1).unwrap().hash,
        Hash::digest(b"unknown"),
        f.dag.get_sequencer_by_id(2).unwrap().hash,
    ];

    f.handler.handle(
        PEER,
        Message::BodiesRequest(BodiesRequest {
            sequencer_hashes: hashes,
        }),
    );

    let sent = f.hub.sent_messages();
    let (_, Message::BodiesResponse(response)) = &sent[0] else {
        panic!("expected a bodies response");
    };
    assert_eq!(response.bodies.len(), 1);
}

#[test]
fn test_bodies_request_respects_caps() {
    let dag = seeded_dag(10, 1);
    let limits = ProtocolLimits {
        max_block_fetch: 4,
        ..ProtocolLimits::default()
    };
    let f = fixture_with(dag, limits);
    let hashes: Vec<Hash> = (1..=10)
        .map(|id| f.dag.get_sequencer_by_id(id).unwrap().hash)
        .collect();

    f.handler.handle_bodies_request(
        PEER,
        BodiesRequest {
            sequencer_hashes: hashes.clone(),
        },
    );
    let sent = f.hub.sent_messages();
    let (_, Message::BodiesResponse(response)) = &sent[0] else {
        panic!("expected a bodies response");
    };
    assert_eq!(response.bodies.len(), 4);

    // A byte budget smaller than one body still lets the first body through.
    let tight = ProtocolLimits {
        soft_response_limit: 1,
        ..ProtocolLimits::default()
    };
    let f = fixture_with(f.dag.clone(), tight);
    f.handler.handle_bodies_request(
        PEER,
        BodiesRequest {
            sequencer_hashes: hashes,
        },
    );
    let sent = f.hub.sent_messages();
    let (_, Message::BodiesResponse(response)) = &sent[0] else {
        panic!("expected a bodies response");
    };
    assert_eq!(response.bodies.len(), 1);
}

#[test]
fn test_bodies_response_delivers_decoded_prefix() {
    let f = fixture(5);
    let body = |id: u64| {
        encode_value(&TxsResponse {
            sequencer: f.dag.get_sequencer_by_id(id),
            txs: f.dag.get_txs_by_number(id),
        })
        .unwrap()
    };
    let bodies = vec![
        body(1),
        body(2),
        encode_value(&TxsResponse::default()).unwrap(),
        body(3),
    ];

    f.handler
        .handle(PEER, Message::BodiesResponse(BodiesResponse { bodies }));

    let delivered = f.downloader.delivered_bodies.lock();
    assert_eq!(delivered.len(), 1);
    let (peer, txs, sequencers) = &delivered[0];
    assert_eq!(peer, PEER);
    assert_eq!(sequencers.iter().map(|seq| seq.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(txs[1], f.dag.get_txs_by_number(2));
}

#[test]
fn test_bodies_response_stops_on_garbage() {
    let f = fixture(3);
    let good = encode_value(&TxsResponse {
        sequencer: f.dag.get_sequencer_by_id(1),
        txs: vec![],
    })
    .unwrap();

    f.handler.handle_bodies_response(
        PEER,
        BodiesResponse {
            bodies: vec![vec![0xff, 0x01], good],
        },
    );

    let delivered = f.downloader.delivered_bodies.lock();
    assert!(delivered[0].2.is_empty());
}

#[rstest]
#[case::by_id(TxsRequest { id: 2, sequencer_hash: None }, Some(2))]
#[case::unknown_id(TxsRequest { id: 42, sequencer_hash: None }, None)]
#[case::wrong_hash(TxsRequest { id: 2, sequencer_hash: Some(Hash::digest(b"nope")) }, None)]
#[case::hash_ignored_for_genesis(TxsRequest { id: 0, sequencer_hash: Some(Hash::digest(b"nope")) }, Some(0))]
fn test_txs_request_lookup(#[case] request: TxsRequest, #[case] expected: Option<u64>) {
    let f = fixture(3);
    f.handler.handle(PEER, Message::TxsRequest(request));

    let sent = f.hub.sent_messages();
    let (_, Message::TxsResponse(response)) = &sent[0] else {
        panic!("expected a txs response");
    };
    assert_eq!(response.sequencer.as_ref().map(|seq| seq.id), expected);
    match expected {
        Some(id) => assert_eq!(response.txs, f.dag.get_txs_by_number(id)),
        None => assert!(response.txs.is_empty()),
    }
}

#[test]
fn test_txs_request_by_hash_and_id() {
    let f = fixture(3);
    let seq = f.dag.get_sequencer_by_id(3).unwrap();

    f.handler.handle_txs_request(
        PEER,
        TxsRequest {
            id: 3,
            sequencer_hash: Some(seq.hash),
        },
    );

    let sent = f.hub.sent_messages();
    let (_, Message::TxsResponse(response)) = &sent[0] else {
        panic!("expected a txs response");
    };
    assert_eq!(response.sequencer, Some(seq));
}

#[test]
fn test_txs_response_newer_than_tip_is_buffered() {
    let mut f = fixture(3);
    let remote = seeded_dag(5, 1);
    let seq = remote.get_sequencer_by_id(4).unwrap();
    let txs = remote.get_txs_by_number(4);

    f.handler.handle(
        PEER,
        Message::TxsResponse(TxsResponse {
            sequencer: Some(seq.clone()),
            txs: txs.clone(),
        }),
    );

    assert_eq!(
        drain(&mut f.buffered),
        vec![TxBufferMessage::RemoteTxs { sequencer: seq, txs }]
    );
}

#[rstest]
#[case::at_tip(3)]
#[case::below_tip(1)]
fn test_stale_txs_response_is_dropped(#[case] id: u64) {
    let mut f = fixture(3);
    let seq = f.dag.get_sequencer_by_id(id).unwrap();

    f.handler.handle_txs_response(
        PEER,
        TxsResponse {
            sequencer: Some(seq),
            txs: vec![],
        },
    );

    assert!(drain(&mut f.buffered).is_empty());
}

#[test]
fn test_txs_response_without_sequencer_is_dropped() {
    let mut f = fixture(1);
    f.handler.handle_txs_response(
        PEER,
        TxsResponse {
            sequencer: None,
            txs: vec![Tx::default()],
        },
    );

    assert!(drain(&mut f.buffered).is_empty());
}

#[test]
fn test_fetch_by_hash_prefers_pool_then_dag() {
    let f = fixture(2);
    let pending = Tx {
        hash: Hash::digest(b"pending"),
        ..Default::default()
    };
    f.pool.add(Txi::Tx(pending.clone()));
    let committed_tx = f.dag.get_txs_by_number(1)[0].clone();
    let committed_seq = f.dag.get_sequencer_by_id(2).unwrap();

    f.handler.handle(
        PEER,
        Message::FetchByHashRequest(SyncRequest {
            hashes: vec![
                pending.hash,
                Hash::digest(b"unknown"),
                committed_seq.hash,
                committed_tx.hash,
            ],
        }),
    );

    let sent = f.hub.sent_messages();
    assert_eq!(
        sent,
        vec![(
            PEER.to_string(),
            Message::FetchByHashResponse(SyncResponse {
                txs: vec![pending, committed_tx],
                sequencers: vec![committed_seq],
            })
        )]
    );
}

#[test]
fn test_empty_fetch_by_hash_request_is_not_answered() {
    let f = fixture(1);
    f.handler
        .handle(PEER, Message::FetchByHashRequest(SyncRequest::default()));
    assert!(f.hub.sent_messages().is_empty());
}

#[test]
fn test_fetch_by_hash_response_feeds_buffer() {
    let mut f = fixture(2);
    let tx = f.dag.get_txs_by_number(1)[0].clone();
    let seq = f.dag.get_sequencer_by_id(2).unwrap();

    f.handler.handle(
        PEER,
        Message::FetchByHashResponse(SyncResponse {
            txs: vec![tx.clone()],
            sequencers: vec![seq.clone()],
        }),
    );

    assert_eq!(
        drain(&mut f.buffered),
        vec![
            TxBufferMessage::RemoteTx(Txi::Tx(tx)),
            TxBufferMessage::RemoteTx(Txi::Sequencer(seq)),
        ]
    );
}

#[test]
fn test_empty_fetch_by_hash_response_is_discarded() {
    let mut f = fixture(1);
    f.handler
        .handle(PEER, Message::FetchByHashResponse(SyncResponse::default()));
    assert!(drain(&mut f.buffered).is_empty());
}

#[test]
fn test_head_announcement_updates_peer_head() {
    let f = fixture(1);
    let hash = Hash::digest(b"their head");

    f.handler.handle(
        PEER,
        Message::SequencerHeader(HeadAnnouncement {
            hash: Some(hash),
            number: 40,
        }),
    );
    f.handler.handle(
        PEER,
        Message::SequencerHeader(HeadAnnouncement {
            hash: None,
            number: 41,
        }),
    );

    assert_eq!(*f.hub.heads.lock(), vec![(PEER.to_string(), hash, 40)]);
    // Announcements never trigger fetches on their own.
    assert!(f.hub.sent_messages().is_empty());
    assert_eq!(f.downloader.call_count(), 0);
}

#[test]
fn test_ping_gets_pong() {
    let f = fixture(0);
    f.handler.handle(PEER, Message::Ping);
    f.handler.handle(PEER, Message::Pong);

    assert_eq!(f.hub.sent_messages(), vec![(PEER.to_string(), Message::Pong)]);
}
