use crate::core::id::Id;
use thiserror::Error;

/// Failure kinds surfaced to callers of the transaction and lock paths.
///
/// `Conflict` and `LockDeclined` are recoverable: the caller may retry with
/// a fresh start time or after a back-off. `Rpc` covers unreachable or
/// timed-out peers on paths where that is survivable (Raft retries
/// internally; the Chord stabilizer skips a round). Inconsistent protocol
/// states are not represented here; they abort the process.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("conflict on id {0}: already present")]
    InsertConflict(Id),

    #[error("conflict on id {0}: concurrently updated")]
    UpdateConflict(Id),

    #[error("conflict condition matched on field {field}")]
    ConditionConflict { field: usize },

    #[error("distributed lock declined by {0}")]
    LockDeclined(crate::core::peer::PeerAddr),

    #[error("id {0} not found")]
    NotFound(Id),

    #[error("rpc to {peer} failed: {reason}")]
    Rpc {
        peer: crate::core::peer::PeerAddr,
        reason: String,
    },
}

impl MapError {
    /// True for failures the caller is expected to resolve by retrying the
    /// whole transaction with a new start time.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            MapError::InsertConflict(_)
                | MapError::UpdateConflict(_)
                | MapError::ConditionConflict { .. }
        )
    }
}
