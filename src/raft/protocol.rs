//! Raft Wire Protocol
//!
//! Request and response bodies exchanged between a chunk's Raft peers. These
//! travel inside the hub envelope, so term and log coordinates are explicit
//! fields rather than headers.

use crate::core::peer::PeerAddr;
use crate::raft::types::EntryPayload;
use serde::{Deserialize, Serialize};

/// Outcome of appending one entry on a follower.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppendStatus {
    /// Entry appended (or message was a pure heartbeat).
    Success,
    /// The exact entry already sits at that position; nothing to do.
    AlreadyPresent,
    /// Sender's term or log is stale; sender should step back.
    Rejected,
    /// Previous-entry coordinates did not match; leader must rewind.
    Failed,
}

/// One log entry as shipped over the wire. The follower derives the index
/// from its own log position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEntry {
    pub term: u64,
    pub sender: PeerAddr,
    pub serial_id: u64,
    pub payload: EntryPayload,
}

/// Leader-to-follower replication message; with no entry attached it is a
/// heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub commit_index: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
    /// Coordinates the new entry must attach behind, present iff `entry` is.
    pub previous_log_index: Option<u64>,
    pub previous_log_term: Option<u64>,
    pub entry: Option<WireEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub status: AppendStatus,
    pub last_log_index: u64,
    pub last_log_term: u64,
    pub commit_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
    pub commit_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub granted: bool,
    pub previous_log_index: u64,
    pub previous_log_term: u64,
}

/// A client-side mutation submitted to whichever peer the caller believes is
/// the leader. Non-leaders answer with a redirect hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAppendRequest {
    pub serial_id: u64,
    /// Set when this is a retry of an earlier submission; the leader then
    /// deduplicates against recent log entries from the same sender.
    pub retrying: bool,
    pub payload: EntryPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAppendResponse {
    /// Log index the entry was appended at; zero if this peer is not the
    /// leader.
    pub index: u64,
    /// Current leader as known by the answering peer, for retry routing.
    pub leader: Option<PeerAddr>,
}
