//! Paginated header range scan.
//!
//! Serves `HeaderRequest` queries from local storage. The scan resolves its
//! origin once (by hash or by number) and then walks the sequencer chain in
//! steps of `skip + 1`, forward or towards genesis, until it runs out of chain
//! or hits one of the response caps.
use std::fmt;

use chain::{Dag, ProtocolLimits};
use containers::{Hash, HeaderQuery, Sequencer};

/// Suspicious pattern found while walking a peer's query.
///
/// The scan stops on either; penalising the peer is up to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalAnomaly {
    /// `current + skip + 1` wrapped around in a forward hash walk.
    SkipOverflow { current: u64, skip: u64 },
    /// The ancestor of the next header is not the header we came from.
    AncestorMismatch { number: u64, expected: Hash },
}

impl fmt::Display for TraversalAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalAnomaly::SkipOverflow { current, skip } => {
                write!(f, "skip overflow (current={current}, skip={skip})")
            }
            TraversalAnomaly::AncestorMismatch { number, expected } => {
                write!(f, "ancestor mismatch at {number}, expected {expected}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderScan {
    pub headers: Vec<Sequencer>,
    pub anomaly: Option<TraversalAnomaly>,
}

/// Collect the headers selected by `query`, in walk order.
///
/// Stops at the first unresolvable position, after `query.amount` headers,
/// once the estimated byte size reaches the soft limit, or at the hard count
/// cap, whichever comes first.
pub fn scan_headers(dag: &dyn Dag, limits: &ProtocolLimits, query: &HeaderQuery) -> HeaderScan {
    let hash_mode = query.is_hash_mode();
    let mut origin_hash = query.origin.hash.unwrap_or(Hash::ZERO);
    let mut origin_number = query.origin.number;
    let mut first = true;

    let mut scan = HeaderScan::default();
    let mut bytes = 0usize;

    while (scan.headers.len() as u64) < query.amount
        && bytes < limits.soft_response_limit
        && scan.headers.len() < limits.max_header_fetch
    {
        let origin = if hash_mode {
            if first {
                first = false;
                dag.get_sequencer_by_hash(&origin_hash)
            } else {
                dag.get_sequencer(&origin_hash, origin_number)
            }
        } else {
            dag.get_sequencer_by_id(origin_number)
        };
        let Some(origin) = origin else {
            break;
        };

        let current = origin.id;
        scan.headers.push(origin);
        bytes += limits.est_header_size;

        match (hash_mode, query.reverse) {
            // Hash based traversal towards genesis
            (true, true) => {
                let Some(seq) = query
                    .skip
                    .checked_add(1)
                    .and_then(|step| current.checked_sub(step))
                    .and_then(|number| dag.get_sequencer_by_id(number))
                else {
                    break;
                };
                if seq.hash.is_empty() {
                    break;
                }
                origin_hash = seq.hash;
                origin_number = seq.id;
            }
            // Hash based traversal towards the leaf
            (true, false) => {
                let step = query.skip.wrapping_add(1);
                let next = current.wrapping_add(step);
                if next <= current {
                    scan.anomaly = Some(TraversalAnomaly::SkipOverflow {
                        current,
                        skip: query.skip,
                    });
                    break;
                }

                let Some(header) = dag.get_sequencer_by_id(next) else {
                    break;
                };
                let ancestor = dag.get_sequencer_by_id(next - step).map(|seq| seq.hash);
                if ancestor != Some(origin_hash) {
                    scan.anomaly = Some(TraversalAnomaly::AncestorMismatch {
                        number: next - step,
                        expected: origin_hash,
                    });
                    break;
                }
                origin_hash = header.hash;
                origin_number = next;
            }
            // Number based traversal towards genesis
            (false, true) => {
                match query.skip.checked_add(1).and_then(|step| current.checked_sub(step)) {
                    Some(number) => origin_number = number,
                    None => break,
                }
            }
            // Number based traversal towards the leaf
            (false, false) => {
                match query.skip.checked_add(1).and_then(|step| current.checked_add(step)) {
                    Some(number) => origin_number = number,
                    None => break,
                }
            }
        }
    }

    scan
}
