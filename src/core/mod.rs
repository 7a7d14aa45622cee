//! Core Primitives Module
//!
//! Shared building blocks used by every other subsystem: identifiers, the
//! process-wide logical clock, peer addressing and the error taxonomy.
//!
//! ## Core Concepts
//! - **Identity**: every row, chunk and table entry is named by an opaque
//!   128-bit [`id::Id`] drawn from a cryptographic random source.
//! - **Logical time**: a per-process monotonic counter ([`time::LogicalClock`])
//!   merged on every inbound message, so that timestamps within any causal
//!   chain always advance.
//! - **Addressing**: peers are identified by their `host:port` endpoint
//!   ([`peer::PeerAddr`]), totally ordered so that all peers agree on
//!   tie-breaks without coordination.

pub mod context;
pub mod error;
pub mod id;
pub mod peer;
pub mod time;

#[cfg(test)]
mod tests;
