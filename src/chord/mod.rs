//! Distributed Hash Index Module
//!
//! A Chord-style ring used as the directory service mapping opaque keys,
//! in particular chunk ids, to the peer responsible for them. Keys are
//! MD5-derived; the node with the first ring position at or after a key's
//! hash is responsible for it.
//!
//! ## Ring maintenance
//! Joining is stabilize-only: a newcomer points successor and predecessor
//! at any existing member, and the periodic stabilization pass (ask your
//! successor for its predecessor, adopt anything closer, then notify)
//! converges the ring. A node that learns of a new predecessor fetches the
//! key range it just became responsible for from its successor; that
//! integration step runs detached because it performs requests of its own.

pub mod index;
pub mod types;

#[cfg(test)]
mod tests;
