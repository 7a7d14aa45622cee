//! Versioned Row Storage Module
//!
//! The per-chunk version store: immutable row revisions keyed by
//! `(item id, logical time)`, held as per-id histories sorted newest-first.
//!
//! ## Core Concepts
//! - **Revision**: one immutable version of a row, carrying its field values
//!   and the logical times of its original insert and of this update.
//! - **History**: the container maps each id to a non-empty revision list in
//!   strictly decreasing update-time order; the oldest entry is the insert.
//! - **Point-in-time reads**: `latest_at(t)` resolves what a reader at
//!   logical time `t` observes, which is how transactions get a stable
//!   snapshot without copying anything.
//! - **Patching**: remote revisions received from peers are admitted
//!   idempotently into sorted position, so replay and duplicate broadcasts
//!   are harmless.

pub mod container;
pub mod descriptor;
pub mod file_io;
pub mod revision;
