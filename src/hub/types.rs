//! Hub Wire Protocol
//!
//! Every message between peers is an [`Envelope`]: a typed payload plus the
//! sender's address and logical time. Receiving a message merges the
//! attached time into the local clock before any handler runs, which keeps
//! logical time advancing along every causal chain.
//!
//! Payloads form a single tagged enum; dispatch on the receiving side is one
//! `match`, and each path only sees the fields of its own variant.

use crate::chord::types::RingKey;
use crate::core::id::Id;
use crate::core::peer::PeerAddr;
use crate::core::time::LogicalTime;
use crate::raft::protocol::{
    AppendEntriesRequest, AppendEntriesResponse, ClientAppendRequest, ClientAppendResponse,
    VoteRequest, VoteResponse,
};
use crate::table::revision::Revision;

use serde::{Deserialize, Serialize};

/// Addressing metadata carried by every chunk-scoped request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRef {
    pub table: String,
    pub chunk_id: Id,
}

/// The single message frame exchanged between peers, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: PeerAddr,
    pub logical_time: LogicalTime,
    pub payload: RpcPayload,
}

/// All requests and responses understood by a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcPayload {
    /// Generic positive acknowledgment.
    Ack,
    /// Generic refusal; the requester backs off or aborts.
    Decline,

    // --- Legacy chunk protocol ---
    /// A peer asks to be invited into the chunk's replica set.
    ChunkConnect { meta: ChunkRef },
    /// Full chunk state handed to a joining peer. The sender holds the
    /// distributed write lock for the duration of the join.
    ChunkInit {
        meta: ChunkRef,
        peers: Vec<PeerAddr>,
        revisions: Vec<Revision>,
    },
    /// Committed insert propagated to replicas.
    ChunkInsert { meta: ChunkRef, revision: Revision },
    /// Committed update propagated to replicas.
    ChunkUpdate { meta: ChunkRef, revision: Revision },
    /// Sender leaves the replica set (sent under its write lock).
    ChunkLeave { meta: ChunkRef },
    /// Distributed write lock acquisition round.
    ChunkLock { meta: ChunkRef },
    /// Distributed write lock release, fanned out in reverse address order.
    ChunkUnlock { meta: ChunkRef },
    /// Membership announcement: `new_peer` is now part of the replica set.
    ChunkNewPeer { meta: ChunkRef, new_peer: PeerAddr },

    // --- Raft chunk protocol ---
    /// Bootstrap of a follower replica; log replay delivers the data.
    RaftInit {
        meta: ChunkRef,
        peers: Vec<PeerAddr>,
        leader: PeerAddr,
    },
    RaftAppendEntries {
        meta: ChunkRef,
        request: AppendEntriesRequest,
    },
    RaftAppendEntriesResponse(AppendEntriesResponse),
    RaftRequestVote {
        meta: ChunkRef,
        request: VoteRequest,
    },
    RaftVoteResponse(VoteResponse),
    RaftClientAppend {
        meta: ChunkRef,
        request: ClientAppendRequest,
    },
    RaftClientAppendResponse(ClientAppendResponse),

    // --- Chord directory protocol ---
    ChordGetSuccessor,
    ChordGetPredecessor,
    ChordClosestPrecedingFinger { key: RingKey },
    ChordNotify,
    ChordAddData { key: String, value: String },
    ChordRetrieveData { key: String },
    ChordFetchResponsibilities,
    ChordPeer(PeerAddr),
    ChordData { value: Option<String> },
    ChordResponsibilities { entries: Vec<(String, String)> },
}

impl RpcPayload {
    pub fn is_ack(&self) -> bool {
        matches!(self, RpcPayload::Ack)
    }

    pub fn is_decline(&self) -> bool {
        matches!(self, RpcPayload::Decline)
    }
}
