//! Request/response correlation within one conversation.

use std::collections::{BTreeMap, HashMap};

use compact_str::CompactString;
use tracing::warn;

/// A request seen in a conversation, and its response once matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Short description of the request (e.g., the command verb).
    pub summary: CompactString,
    pub request_frame: u64,
    pub request_ts_us: i64,
    /// Repeats of the request after the first.
    pub duplicate_requests: u32,
    pub response: Option<Response>,
    seq: u64,
}

impl Transaction {
    pub fn is_complete(&self) -> bool {
        self.response.is_some()
    }
}

/// The first response matched to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub frame: u64,
    pub ts_us: i64,
    pub latency_us: u64,
    /// Repeats of the response after the first.
    pub duplicates: u32,
}

/// What `begin_transaction` observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// First request with this id.
    New,
    /// The id was already requested in `first_frame`; the original is kept.
    DuplicateRequest { first_frame: u64 },
}

impl BeginOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, BeginOutcome::DuplicateRequest { .. })
    }
}

/// What `complete_transaction` observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// First response to a pending request.
    Completed {
        latency_us: u64,
        request_frame: u64,
        summary: CompactString,
    },
    /// The request was already answered in `first_response_frame`.
    DuplicateResponse { first_response_frame: u64 },
    /// No request with this id was seen.
    UnsolicitedResponse,
}

/// Transactions of one conversation, bounded in size.
///
/// Two `seq -> id` indexes keep pending and completed transactions in
/// arrival order, so eviction never scans the map.
#[derive(Debug, Clone)]
pub struct TransactionMap {
    entries: HashMap<u64, Transaction>,
    pending_order: BTreeMap<u64, u64>,
    completed_order: BTreeMap<u64, u64>,
    next_seq: u64,
    capacity: usize,
}

impl TransactionMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            pending_order: BTreeMap::new(),
            completed_order: BTreeMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn begin(
        &mut self,
        id: u64,
        summary: &str,
        ts_us: i64,
        frame: u64,
    ) -> BeginOutcome {
        if let Some(existing) = self.entries.get_mut(&id) {
            existing.duplicate_requests += 1;
            return BeginOutcome::DuplicateRequest {
                first_frame: existing.request_frame,
            };
        }

        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending_order.insert(seq, id);
        self.entries.insert(
            id,
            Transaction {
                summary: CompactString::new(summary),
                request_frame: frame,
                request_ts_us: ts_us,
                duplicate_requests: 0,
                response: None,
                seq,
            },
        );
        BeginOutcome::New
    }

    pub(crate) fn complete(&mut self, id: u64, ts_us: i64, frame: u64) -> CompleteOutcome {
        let Some(transaction) = self.entries.get_mut(&id) else {
            return CompleteOutcome::UnsolicitedResponse;
        };

        if let Some(response) = transaction.response.as_mut() {
            response.duplicates += 1;
            return CompleteOutcome::DuplicateResponse {
                first_response_frame: response.frame,
            };
        }

        let latency_us = match u64::try_from(ts_us.saturating_sub(transaction.request_ts_us)) {
            Ok(latency) => latency,
            Err(_) => {
                warn!(
                    transaction = id,
                    request_frame = transaction.request_frame,
                    response_frame = frame,
                    "response timestamp precedes its request, latency clamped to 0"
                );
                0
            }
        };
        self.pending_order.remove(&transaction.seq);
        self.completed_order.insert(transaction.seq, id);
        transaction.response = Some(Response {
            frame,
            ts_us,
            latency_us,
            duplicates: 0,
        });
        CompleteOutcome::Completed {
            latency_us,
            request_frame: transaction.request_frame,
            summary: transaction.summary.clone(),
        }
    }

    /// Drop the oldest completed transaction, or the oldest pending one if
    /// nothing has completed.
    fn evict_one(&mut self) {
        let victim = self
            .completed_order
            .pop_first()
            .or_else(|| self.pending_order.pop_first());
        if let Some((_, id)) = victim {
            self.entries.remove(&id);
        }
    }

    pub fn get(&self, id: u64) -> Option<&Transaction> {
        self.entries.get(&id)
    }

    /// Requests without a response.
    pub fn pending(&self) -> usize {
        self.pending_order.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
