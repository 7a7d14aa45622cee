use crate::core::peer::PeerAddr;
use crate::table::revision::Revision;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// What a committed log entry does to the chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EntryPayload {
    Noop,
    Insert(Revision),
    Update(Revision),
    /// Acquire the chunk write lock for the entry's sender. The sender holds
    /// the lock iff its own lock entry is the latest committed one without a
    /// matching unlock.
    Lock,
    /// Release the lock acquired by the entry at `lock_index`.
    Unlock { lock_index: u64 },
    AddPeer(PeerAddr),
    RemovePeer(PeerAddr),
}

/// One replicated log entry.
///
/// `serial_id` together with `sender` deduplicates client retries: a
/// resubmission of an entry that already reached the log resolves to the
/// original index instead of appending twice.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub sender: PeerAddr,
    pub serial_id: u64,
    pub payload: EntryPayload,
    /// Leader-side bookkeeping: peers that acknowledged this entry.
    pub replicators: BTreeSet<PeerAddr>,
}

impl LogEntry {
    /// The log sentinel every peer starts from, so that the first real entry
    /// always has a predecessor to match against.
    pub fn sentinel() -> Self {
        Self {
            index: 0,
            term: 0,
            sender: PeerAddr::new(""),
            serial_id: 0,
            payload: EntryPayload::Noop,
            replicators: BTreeSet::new(),
        }
    }
}

/// Committed view of the chunk write lock, derived purely from the log.
#[derive(Debug, Clone, Default)]
pub struct RaftLockState {
    pub holder: Option<PeerAddr>,
    pub lock_index: u64,
}
