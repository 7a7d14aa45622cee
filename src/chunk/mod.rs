//! Replicated Chunk Module (broadcast backend)
//!
//! A chunk is the unit of replication: a set of rows of one table, held by a
//! dynamic swarm of peers. This module implements the chunk as a replicated
//! state machine coordinated by a distributed reader/writer lock:
//!
//! - **Locking**: writing requires an ACK from every peer in the replica
//!   set. Concurrent attempts are tie-broken by peer address (lowest wins),
//!   and releases fan out in reverse address order so that the lock never
//!   appears free on a low peer while a higher peer still considers it held.
//! - **Membership**: peers are invited under the write lock; the newcomer
//!   receives the full revision history and the swarm learns of it before
//!   it is added. Leaving broadcasts a removal, also under the lock.
//! - **Propagation**: committed writes are broadcast to every replica, which
//!   admits them idempotently into its row container.
//! - **Triggers**: callbacks observing the ids touched by a remote commit,
//!   dispatched once the remote writer releases the lock.

pub mod chunk;
pub mod lock;
pub mod triggers;
