//! Decentralized Versioned Map Library
//!
//! This library crate implements a multi-agent storage substrate: peers
//! share, mutate and version tabular data whose rows are partitioned into
//! replicated chunks. It is the foundation for the node binary (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of eight loosely coupled subsystems:
//!
//! - **`core`**: Shared primitives: 128-bit identifiers, the process-wide
//!   logical clock merged on every message, peer addressing, the error
//!   taxonomy and the `Core` context tying one process together.
//! - **`table`**: The per-chunk version store: immutable row revisions held
//!   as newest-first histories, point-in-time reads, idempotent patching of
//!   remote revisions, and the compressed chunk dump file format.
//! - **`hub`**: The communication layer. A typed envelope over HTTP, one
//!   dispatch point for all inbound traffic, and the broadcast primitive
//!   commit propagation relies on.
//! - **`chunk`**: The broadcast-backend chunk: a distributed reader/writer
//!   lock with address-ordered tie-breaks, swarm membership grown and shrunk
//!   under that lock, and commit broadcast to every replica.
//! - **`raft`**: The alternative chunk backend where the replicated log
//!   drives rows, the write lock and membership alike.
//! - **`transaction`**: Optimistic chunk transactions and their composition
//!   into multi-chunk two-phase commits with a deterministic lock order.
//! - **`chord`**: The ring directory mapping chunk ids to responsible
//!   peers, maintained by stabilize-join.
//! - **`net_table`**: The table-level index over chunks, routing inbound
//!   chunk requests and publishing chunk locations in the ring.

pub mod chord;
pub mod chunk;
pub mod core;
pub mod hub;
pub mod net_table;
pub mod raft;
pub mod table;
pub mod transaction;
