//! Cross-packet state for stateful protocols.
//!
//! The [`ConversationTable`] maps a [`ConversationKey`] to a
//! [`ConversationRecord`] holding the negotiated protocol version and the
//! request/response transactions of that conversation.
//!
//! ## Concurrency
//!
//! The table is split into shards, each behind its own
//! `parking_lot::Mutex`, and every method takes `&self`. Each
//! lookup-and-mutate operation (`pin_state`, `begin_transaction`,
//! `complete_transaction`) holds its shard lock for its whole duration, so
//! it is atomic per key even when packets are dissected on several
//! threads.

mod key;
mod transaction;

pub use key::ConversationKey;
pub use transaction::{BeginOutcome, CompleteOutcome, Response, Transaction, TransactionMap};

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

use crate::config::EngineConfig;

/// Negotiated protocol version of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    Ssl2,
    Ssl3,
    /// TLS 1.x with the wire minor version (TLS 1.0 has wire version 3.1).
    Tls { minor: u8 },
    /// Private Communication Technology.
    Pct,
    /// Any other versioned protocol.
    Other { protocol: &'static str, version: u32 },
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::Ssl2 => f.write_str("SSLv2"),
            ProtocolVersion::Ssl3 => f.write_str("SSLv3"),
            ProtocolVersion::Tls { minor } => write!(f, "TLSv1.{}", minor.saturating_sub(1)),
            ProtocolVersion::Pct => f.write_str("PCT"),
            ProtocolVersion::Other { protocol, version } => write!(f, "{protocol} {version}"),
        }
    }
}

/// Version state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionState {
    #[default]
    Unknown,
    Pinned(ProtocolVersion),
}

impl VersionState {
    pub fn version(&self) -> Option<ProtocolVersion> {
        match self {
            VersionState::Unknown => None,
            VersionState::Pinned(version) => Some(*version),
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self, VersionState::Pinned(_))
    }
}

/// State kept for one conversation.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    state: VersionState,
    /// Timing (microseconds).
    pub first_seen_us: Option<i64>,
    pub last_seen_us: Option<i64>,
    /// Frame references.
    pub first_frame: Option<u64>,
    pub last_frame: Option<u64>,
    pub packets: u64,
    pub duplicate_requests: u64,
    pub duplicate_responses: u64,
    pub unsolicited_responses: u64,
    transactions: TransactionMap,
}

impl ConversationRecord {
    pub fn new(max_transactions: usize) -> Self {
        Self {
            state: VersionState::Unknown,
            first_seen_us: None,
            last_seen_us: None,
            first_frame: None,
            last_frame: None,
            packets: 0,
            duplicate_requests: 0,
            duplicate_responses: 0,
            unsolicited_responses: 0,
            transactions: TransactionMap::new(max_transactions),
        }
    }

    pub fn state(&self) -> VersionState {
        self.state
    }

    /// Pin the version if still unknown and the evidence is authoritative.
    ///
    /// Returns true when the state changed.
    pub fn pin(&mut self, candidate: ProtocolVersion, authoritative: bool) -> bool {
        if authoritative && self.state == VersionState::Unknown {
            self.state = VersionState::Pinned(candidate);
            return true;
        }
        false
    }

    pub fn transactions(&self) -> &TransactionMap {
        &self.transactions
    }

    /// Record activity at `ts_us` in `frame`.
    pub fn observe(&mut self, frame: u64, ts_us: i64) {
        self.first_seen_us.get_or_insert(ts_us);
        self.first_frame.get_or_insert(frame);
        self.last_seen_us = Some(self.last_seen_us.map_or(ts_us, |last| last.max(ts_us)));
        self.last_frame = Some(frame);
        self.packets += 1;
    }

    fn is_idle(&self, now_us: i64, timeout_us: i64) -> bool {
        match self.last_seen_us {
            Some(last) => now_us.saturating_sub(last) > timeout_us,
            None => true,
        }
    }
}

type Shard = Mutex<HashMap<ConversationKey, ConversationRecord>>;

/// Sharded table of conversation records.
pub struct ConversationTable {
    shards: Box<[Shard]>,
    hasher: RandomState,
    idle_timeout_us: i64,
    max_transactions: usize,
}

impl ConversationTable {
    /// `shards` is rounded up to a power of two.
    pub fn new(shards: usize, idle_timeout_us: i64, max_transactions: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            idle_timeout_us,
            max_transactions,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.conversation_shards,
            config.conversation_idle_timeout_us,
            config.max_transactions_per_conversation,
        )
    }

    fn shard(&self, key: &ConversationKey) -> &Shard {
        let hash = self.hasher.hash_one(key) as usize;
        &self.shards[hash & (self.shards.len() - 1)]
    }

    /// The record for `key`, created empty if missing.
    ///
    /// The shard stays locked while the guard lives; do not hold it across
    /// another table call.
    pub fn find_or_create(&self, key: &ConversationKey) -> MappedMutexGuard<'_, ConversationRecord> {
        let max_transactions = self.max_transactions;
        MutexGuard::map(self.shard(key).lock(), |records| {
            records
                .entry(*key)
                .or_insert_with(|| ConversationRecord::new(max_transactions))
        })
    }

    /// Record packet activity on a conversation.
    pub fn touch(&self, key: &ConversationKey, frame: u64, ts_us: i64) {
        self.find_or_create(key).observe(frame, ts_us);
    }

    /// Pin the version of a conversation.
    ///
    /// Only the first authoritative observation takes effect; the returned
    /// state is the one in force afterwards.
    pub fn pin_state(
        &self,
        key: &ConversationKey,
        candidate: ProtocolVersion,
        authoritative: bool,
    ) -> VersionState {
        let mut record = self.find_or_create(key);
        if record.pin(candidate, authoritative) {
            debug!(?key, version = %candidate, "conversation version pinned");
        }
        record.state()
    }

    /// Version state of a conversation, `Unknown` if never seen.
    pub fn state(&self, key: &ConversationKey) -> VersionState {
        self.shard(key)
            .lock()
            .get(key)
            .map_or(VersionState::Unknown, |record| record.state())
    }

    /// Record a request.
    pub fn begin_transaction(
        &self,
        key: &ConversationKey,
        transaction_id: u64,
        summary: &str,
        ts_us: i64,
        frame: u64,
    ) -> BeginOutcome {
        let mut record = self.find_or_create(key);
        record.observe(frame, ts_us);
        let outcome = record.transactions.begin(transaction_id, summary, ts_us, frame);
        if let BeginOutcome::DuplicateRequest { first_frame } = outcome {
            record.duplicate_requests += 1;
            debug!(transaction_id, frame, first_frame, "duplicate request");
        }
        outcome
    }

    /// Match a response to its request.
    pub fn complete_transaction(
        &self,
        key: &ConversationKey,
        transaction_id: u64,
        ts_us: i64,
        frame: u64,
    ) -> CompleteOutcome {
        let mut record = self.find_or_create(key);
        record.observe(frame, ts_us);
        let outcome = record.transactions.complete(transaction_id, ts_us, frame);
        match &outcome {
            CompleteOutcome::Completed { latency_us, .. } => {
                debug!(transaction_id, frame, latency_us, "transaction completed")
            }
            CompleteOutcome::DuplicateResponse {
                first_response_frame,
            } => {
                record.duplicate_responses += 1;
                debug!(transaction_id, frame, first_response_frame, "duplicate response");
            }
            CompleteOutcome::UnsolicitedResponse => {
                record.unsolicited_responses += 1;
                debug!(transaction_id, frame, "unsolicited response");
            }
        }
        outcome
    }

    /// Snapshot of a record.
    pub fn get(&self, key: &ConversationKey) -> Option<ConversationRecord> {
        self.shard(key).lock().get(key).cloned()
    }

    pub fn remove(&self, key: &ConversationKey) -> Option<ConversationRecord> {
        self.shard(key).lock().remove(key)
    }

    /// Drop every record.
    pub fn flush(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }

    /// Remove conversations idle for longer than the idle timeout.
    ///
    /// Returns the number removed.
    pub fn expire_idle(&self, now_us: i64) -> usize {
        let timeout = self.idle_timeout_us;
        let removed: usize = self
            .shards
            .iter()
            .map(|shard| {
                let mut records = shard.lock();
                let before = records.len();
                records.retain(|_, record| !record.is_idle(now_us, timeout));
                before - records.len()
            })
            .sum();
        if removed > 0 {
            debug!(removed, "expired idle conversations");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for ConversationTable {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl std::fmt::Debug for ConversationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationTable")
            .field("shards", &self.shards.len())
            .field("conversations", &self.len())
            .field("idle_timeout_us", &self.idle_timeout_us)
            .field("max_transactions", &self.max_transactions)
            .finish()
    }
}
