//! Transaction Module
//!
//! Optimistic transactions over chunked storage. A transaction is scoped to
//! a start time sampled from the logical clock; reads observe the chunk
//! state as of that time plus the transaction's own uncommitted buffers.
//!
//! ## Commit discipline
//! - A [`chunk_transaction::ChunkTransaction`] buffers inserts, updates and
//!   removes for one chunk and knows how to detect conflicts against the
//!   chunk's current state.
//! - A [`net_transaction::NetTableTransaction`] groups chunk transactions
//!   and commits them with two-phase locking: every touched chunk is
//!   write-locked in ascending chunk-id order (the globally agreed order
//!   that makes deadlock impossible), all conflict checks run, all writes
//!   apply at one shared commit time, and the locks release in reverse.
//!   Nothing is applied before every check has passed, so aborts leave no
//!   partial state behind.

pub mod chunk_transaction;
pub mod net_transaction;

#[cfg(test)]
mod tests;
