//! Net Table Module
//!
//! A net table is the set of all chunks of one logical table across all
//! peers. This module keeps the local chunk registry, creates and looks up
//! chunks, publishes chunk locations in the distributed directory, and
//! routes inbound chunk-scoped requests to the right replica.
//!
//! Chunks come in two consistency flavors selected per table: the broadcast
//! backend with its distributed reader/writer lock, and the Raft backend
//! where every mutation is a log entry. [`table::ChunkHandle`] papers over
//! the difference so transactions work against either.

pub mod table;

#[cfg(test)]
mod tests;
