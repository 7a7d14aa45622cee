use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Network endpoint of a peer, as a `host:port` string.
///
/// The lexicographic total order on addresses is load-bearing: the
/// distributed lock protocol and the unlock fan-out both rely on every peer
/// ranking the swarm identically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddr(pub String);

impl PeerAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base URL for this peer's RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://{}/rpc", self.0)
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
