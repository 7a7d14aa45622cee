use crate::core::error::MapError;
use crate::core::peer::PeerAddr;
use crate::core::time::{LogicalClock, LogicalTime};
use crate::hub::types::{Envelope, RpcPayload};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for a request/response round trip. Lock requests may
/// legitimately wait on the remote side for readers to drain, so this is
/// deliberately generous; Raft passes its own, much shorter deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide peer endpoint set and request/broadcast primitive.
///
/// The hub owns the HTTP client, the local address and the logical clock.
/// Every outbound envelope is stamped with a fresh clock sample; every
/// response (and, on the server side, every inbound request) is merged back
/// into the clock before the payload is handed to anyone.
pub struct Hub {
    local: PeerAddr,
    pub clock: Arc<LogicalClock>,
    http: reqwest::Client,
    /// Peers that announced their departure; broadcasts skip them.
    left: DashMap<PeerAddr, ()>,
}

impl Hub {
    pub fn new(local: PeerAddr, clock: Arc<LogicalClock>) -> Arc<Self> {
        Arc::new(Self {
            local,
            clock,
            http: reqwest::Client::new(),
            left: DashMap::new(),
        })
    }

    pub fn local(&self) -> &PeerAddr {
        &self.local
    }

    pub fn sample(&self) -> LogicalTime {
        self.clock.sample()
    }

    /// Stamps a payload into an outbound envelope.
    pub fn wrap(&self, payload: RpcPayload) -> Envelope {
        Envelope {
            sender: self.local.clone(),
            logical_time: self.clock.sample(),
            payload,
        }
    }

    /// Sends one request and waits for the peer's response envelope.
    pub async fn request(
        &self,
        peer: &PeerAddr,
        payload: RpcPayload,
    ) -> Result<RpcPayload, MapError> {
        self.request_with_timeout(peer, payload, REQUEST_TIMEOUT)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        peer: &PeerAddr,
        payload: RpcPayload,
        timeout: Duration,
    ) -> Result<RpcPayload, MapError> {
        let envelope = self.wrap(payload);
        let response = self
            .http
            .post(peer.rpc_url())
            .json(&envelope)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| MapError::Rpc {
                peer: peer.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MapError::Rpc {
                peer: peer.clone(),
                reason: format!("status {}", response.status()),
            });
        }

        let reply: Envelope = response.json().await.map_err(|e| MapError::Rpc {
            peer: peer.clone(),
            reason: e.to_string(),
        })?;
        self.clock.merge(reply.logical_time);
        Ok(reply.payload)
    }

    /// Request expecting a plain Ack/Decline answer. Returns true on Ack.
    pub async fn ack_request(
        &self,
        peer: &PeerAddr,
        payload: RpcPayload,
    ) -> Result<bool, MapError> {
        match self.request(peer, payload).await? {
            RpcPayload::Ack => Ok(true),
            RpcPayload::Decline => Ok(false),
            other => Err(MapError::Rpc {
                peer: peer.clone(),
                reason: format!("unexpected response {:?}", other),
            }),
        }
    }

    /// Broadcast that must succeed on every listed peer.
    ///
    /// The commit propagation protocol assumes replicas do not vanish
    /// mid-broadcast; a transport failure or a Decline here means the swarm
    /// state has diverged beyond repair, so the process aborts.
    pub async fn undisputable_broadcast(&self, peers: &[PeerAddr], payload: RpcPayload) {
        for peer in peers {
            if self.left.contains_key(peer) {
                continue;
            }
            match self.ack_request(peer, payload.clone()).await {
                Ok(true) => {}
                Ok(false) => {
                    panic!("peer {} declined an undisputable broadcast", peer);
                }
                Err(e) => {
                    panic!("undisputable broadcast to {} failed: {}", peer, e);
                }
            }
        }
    }

    /// Records that a peer has left; subsequent broadcasts skip it.
    pub fn mark_left(&self, peer: &PeerAddr) {
        self.left.insert(peer.clone(), ());
    }

    pub fn has_left(&self, peer: &PeerAddr) -> bool {
        self.left.contains_key(peer)
    }
}
