//! Raft Chunk Backend Module
//!
//! Alternative chunk consistency backend: instead of the broadcast protocol
//! with its distributed reader/writer lock, the chunk's authoritative state
//! is the committed prefix of a replicated log. Every mutation is a log
//! entry: row inserts and updates, the chunk write lock itself, and
//! membership changes alike.
//!
//! ## Roles
//! Peers are followers by default. A follower that hears no heartbeat
//! within a randomized timeout becomes a candidate, bumps its term and asks
//! the swarm for votes; a majority makes it leader. The leader runs one
//! tracker task per peer that pushes the log forward entry by entry and
//! doubles as the heartbeat.
//!
//! ## Safety
//! Vote grants require a strictly newer term and an at-least-as-up-to-date
//! log, which yields at most one leader per term; meeting a second leader in
//! the same term is fatal. Conflicting uncommitted entries on a follower are
//! truncated; truncating a committed entry is fatal.

pub mod chunk;
pub mod node;
pub mod protocol;
pub mod types;

#[cfg(test)]
mod tests;
