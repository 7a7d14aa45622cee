//! Peer Hub Module
//!
//! The process-wide communication layer: one HTTP client for outbound
//! requests, one `/rpc` endpoint for inbound ones, and the envelope format
//! both directions share.
//!
//! ## Core Concepts
//! - **Envelope**: every message carries the sender's address and logical
//!   time; the receiving side merges the time into its clock before any
//!   handler runs.
//! - **Dispatch**: payloads form one tagged enum and the server side is a
//!   single `match` routing to the chunk, raft or ring handlers through the
//!   [`crate::core::context::Core`] context.
//! - **Broadcast**: the commit propagation paths require an ACK from every
//!   replica; a failure there is treated as an unrecoverable divergence.

pub mod handlers;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
