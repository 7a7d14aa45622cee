use crate::chord::types::{is_in, ring_hash, ChordPeer, RingKey, RING_BITS};
use crate::core::error::MapError;
use crate::core::peer::PeerAddr;
use crate::hub::service::Hub;
use crate::hub::types::RpcPayload;

use dashmap::DashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Default pause between stabilization passes.
pub const DEFAULT_STABILIZE_INTERVAL: Duration = Duration::from_millis(50);

struct Finger {
    base_key: RingKey,
    peer: ChordPeer,
}

struct RingState {
    successor: ChordPeer,
    predecessor: ChordPeer,
    fingers: Vec<Finger>,
}

/// One node of the ring.
pub struct ChordIndex {
    hub: Arc<Hub>,
    own_key: RingKey,
    ring: Mutex<RingState>,
    /// Directory payload this node is responsible for.
    data: DashMap<String, String>,
    initialized: Mutex<bool>,
    initialized_changed: Notify,
    integrated: AtomicBool,
    integrate_gate: tokio::sync::Mutex<()>,
    terminate: AtomicBool,
    stabilize_interval: Duration,
}

impl ChordIndex {
    pub fn new(hub: Arc<Hub>, stabilize_interval: Duration) -> Arc<Self> {
        let own = ChordPeer::new(hub.local().clone());
        let own_key = own.key;
        let fingers = (0..RING_BITS)
            .map(|i| Finger {
                // Overflow wraps around the ring, as intended.
                base_key: own_key.wrapping_add(1u64.wrapping_shl(i as u32)),
                peer: own.clone(),
            })
            .collect();
        Arc::new(Self {
            hub,
            own_key,
            ring: Mutex::new(RingState {
                successor: own.clone(),
                predecessor: own,
                fingers,
            }),
            data: DashMap::new(),
            initialized: Mutex::new(false),
            initialized_changed: Notify::new(),
            integrated: AtomicBool::new(false),
            integrate_gate: tokio::sync::Mutex::new(()),
            terminate: AtomicBool::new(false),
            stabilize_interval,
        })
    }

    pub fn own_key(&self) -> RingKey {
        self.own_key
    }

    pub fn successor(&self) -> PeerAddr {
        self.ring.lock().unwrap().successor.addr.clone()
    }

    pub fn predecessor(&self) -> PeerAddr {
        self.ring.lock().unwrap().predecessor.addr.clone()
    }

    /// Founds a fresh ring with this node as its only member.
    pub fn create(self: &Arc<Self>) {
        let own = ChordPeer::new(self.hub.local().clone());
        {
            let mut ring = self.ring.lock().unwrap();
            ring.successor = own.clone();
            ring.predecessor = own.clone();
            for finger in &mut ring.fingers {
                finger.peer = own.clone();
            }
        }
        self.mark_initialized();
        self.start_stabilizer();
    }

    /// Stabilize-join through any existing member: point both neighbors at
    /// it and let stabilization converge the ring.
    pub fn join(self: &Arc<Self>, other: PeerAddr) {
        let entry = ChordPeer::new(other);
        {
            let mut ring = self.ring.lock().unwrap();
            ring.successor = entry.clone();
            ring.predecessor = entry;
        }
        self.mark_initialized();
        self.start_stabilizer();
    }

    pub fn leave(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        *self.initialized.lock().unwrap() = false;
        self.initialized_changed.notify_waiters();
        self.integrated.store(false, Ordering::SeqCst);
    }

    fn mark_initialized(&self) {
        *self.initialized.lock().unwrap() = true;
        self.initialized_changed.notify_waiters();
    }

    async fn wait_until_initialized(&self) -> bool {
        loop {
            let mut notified = pin!(self.initialized_changed.notified());
            notified.as_mut().enable();
            if *self.initialized.lock().unwrap() {
                return true;
            }
            if self.terminate.load(Ordering::SeqCst) {
                return false;
            }
            notified.await;
        }
    }

    fn start_stabilizer(self: &Arc<Self>) {
        let index = Arc::clone(self);
        tokio::spawn(async move {
            index.stabilize_loop().await;
        });
    }

    /// Periodic ring maintenance: adopt a closer successor if our successor
    /// learned of one, then announce ourselves to it.
    async fn stabilize_loop(self: Arc<Self>) {
        if !self.wait_until_initialized().await {
            return;
        }
        while !self.terminate.load(Ordering::SeqCst) {
            let successor = self.ring.lock().unwrap().successor.clone();
            if successor.addr != *self.hub.local() {
                match self.get_predecessor_rpc(&successor.addr).await {
                    Ok(candidate) => {
                        if candidate != *self.hub.local()
                            && is_in(ring_hash(candidate.as_str()), self.own_key, successor.key)
                        {
                            let adopted = ChordPeer::new(candidate);
                            tracing::trace!(
                                "{:x} adopting successor {:x} through stabilization",
                                self.own_key,
                                adopted.key
                            );
                            self.set_successor(adopted);
                        }
                        let successor = self.ring.lock().unwrap().successor.addr.clone();
                        if let Err(e) = self
                            .hub
                            .request(&successor, RpcPayload::ChordNotify)
                            .await
                        {
                            tracing::debug!("Notify to {} failed: {}", successor, e);
                        }
                    }
                    Err(e) => {
                        // Departed nodes are not reconciled; skipping the
                        // round keeps a shutting-down ring from crashing.
                        tracing::debug!("Stabilization against {} failed: {}", successor.addr, e);
                    }
                }
            }
            tokio::time::sleep(self.stabilize_interval).await;
        }
    }

    fn set_successor(&self, peer: ChordPeer) {
        let mut ring = self.ring.lock().unwrap();
        ring.successor = peer.clone();
        // Keep fingers covered by the new successor fresh.
        for finger in &mut ring.fingers {
            if is_in(finger.base_key, self.own_key, peer.key) {
                finger.peer = peer.clone();
            }
        }
    }

    // --- Lookup ---

    /// The peer responsible for `key`: the first node at or after it on the
    /// ring.
    pub async fn find_successor(&self, key: RingKey) -> Result<PeerAddr, MapError> {
        let successor = self.ring.lock().unwrap().successor.clone();
        if is_in(key, self.own_key, successor.key) {
            return Ok(successor.addr);
        }
        let predecessor = self.find_predecessor(key).await?;
        self.get_successor_rpc(&predecessor).await
    }

    async fn find_predecessor(&self, key: RingKey) -> Result<PeerAddr, MapError> {
        let mut result = self.closest_preceding_finger(key);
        let mut result_successor = self.get_successor_rpc(&result).await?;
        while !is_in(
            key,
            ring_hash(result.as_str()),
            ring_hash(result_successor.as_str()),
        ) {
            result = self.closest_preceding_finger_rpc(&result, key).await?;
            result_successor = self.get_successor_rpc(&result).await?;
        }
        Ok(result)
    }

    fn closest_preceding_finger(&self, key: RingKey) -> PeerAddr {
        let ring = self.ring.lock().unwrap();
        for finger in ring.fingers.iter().rev() {
            if is_in(finger.peer.key, self.own_key.wrapping_add(1), key) {
                return finger.peer.addr.clone();
            }
        }
        ring.successor.addr.clone()
    }

    // --- Directory data ---

    /// Stores `value` under `key` at whichever node is responsible.
    pub async fn add_data(&self, key: String, value: String) -> Result<(), MapError> {
        let responsible = self.find_successor(ring_hash(&key)).await?;
        if responsible == *self.hub.local() {
            self.add_data_locally(key, value);
            Ok(())
        } else {
            let accepted = self
                .hub
                .ack_request(&responsible, RpcPayload::ChordAddData { key, value })
                .await?;
            if accepted {
                Ok(())
            } else {
                Err(MapError::Rpc {
                    peer: responsible,
                    reason: "add_data declined".into(),
                })
            }
        }
    }

    /// Fetches the value under `key` from whichever node is responsible.
    pub async fn retrieve_data(&self, key: String) -> Result<Option<String>, MapError> {
        let responsible = self.find_successor(ring_hash(&key)).await?;
        if responsible == *self.hub.local() {
            return Ok(self.retrieve_data_locally(&key));
        }
        match self
            .hub
            .request(&responsible, RpcPayload::ChordRetrieveData { key })
            .await?
        {
            RpcPayload::ChordData { value } => Ok(value),
            other => Err(MapError::Rpc {
                peer: responsible,
                reason: format!("unexpected retrieve response {:?}", other),
            }),
        }
    }

    fn add_data_locally(&self, key: String, value: String) {
        if self.data.contains_key(&key) {
            tracing::debug!("Directory entry {} overwritten", key);
        }
        self.data.insert(key, value);
    }

    fn retrieve_data_locally(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    pub fn local_entry_count(&self) -> usize {
        self.data.len()
    }

    // --- RPC wrappers ---

    async fn get_successor_rpc(&self, peer: &PeerAddr) -> Result<PeerAddr, MapError> {
        match self.hub.request(peer, RpcPayload::ChordGetSuccessor).await? {
            RpcPayload::ChordPeer(successor) => Ok(successor),
            other => Err(MapError::Rpc {
                peer: peer.clone(),
                reason: format!("unexpected successor response {:?}", other),
            }),
        }
    }

    async fn get_predecessor_rpc(&self, peer: &PeerAddr) -> Result<PeerAddr, MapError> {
        match self
            .hub
            .request(peer, RpcPayload::ChordGetPredecessor)
            .await?
        {
            RpcPayload::ChordPeer(predecessor) => Ok(predecessor),
            other => Err(MapError::Rpc {
                peer: peer.clone(),
                reason: format!("unexpected predecessor response {:?}", other),
            }),
        }
    }

    async fn closest_preceding_finger_rpc(
        &self,
        peer: &PeerAddr,
        key: RingKey,
    ) -> Result<PeerAddr, MapError> {
        match self
            .hub
            .request(peer, RpcPayload::ChordClosestPrecedingFinger { key })
            .await?
        {
            RpcPayload::ChordPeer(finger) => Ok(finger),
            other => Err(MapError::Rpc {
                peer: peer.clone(),
                reason: format!("unexpected finger response {:?}", other),
            }),
        }
    }

    // --- Handlers ---

    pub async fn handle_request(self: &Arc<Self>, sender: PeerAddr, payload: RpcPayload) -> RpcPayload {
        match payload {
            RpcPayload::ChordGetSuccessor => {
                if !self.wait_until_initialized().await {
                    return RpcPayload::Decline;
                }
                RpcPayload::ChordPeer(self.successor())
            }
            RpcPayload::ChordGetPredecessor => {
                if !self.wait_until_initialized().await {
                    return RpcPayload::Decline;
                }
                RpcPayload::ChordPeer(self.predecessor())
            }
            RpcPayload::ChordClosestPrecedingFinger { key } => {
                if !self.wait_until_initialized().await {
                    return RpcPayload::Decline;
                }
                RpcPayload::ChordPeer(self.closest_preceding_finger(key))
            }
            RpcPayload::ChordNotify => {
                if !self.wait_until_initialized().await {
                    return RpcPayload::Decline;
                }
                self.handle_notify(sender);
                RpcPayload::Ack
            }
            RpcPayload::ChordAddData { key, value } => {
                self.add_data_locally(key, value);
                RpcPayload::Ack
            }
            RpcPayload::ChordRetrieveData { key } => RpcPayload::ChordData {
                value: self.retrieve_data_locally(&key),
            },
            RpcPayload::ChordFetchResponsibilities => {
                RpcPayload::ChordResponsibilities {
                    entries: self.responsibilities_for(&sender),
                }
            }
            other => {
                tracing::warn!("Ring node received a request it cannot handle: {:?}", other);
                RpcPayload::Decline
            }
        }
    }

    /// A peer announced itself. Adopt it as successor or predecessor when it
    /// falls between us and the current one; the first predecessor change
    /// triggers integration.
    fn handle_notify(self: &Arc<Self>, peer_addr: PeerAddr) {
        let peer = ChordPeer::new(peer_addr);
        let mut adopted_predecessor = false;
        {
            let mut ring = self.ring.lock().unwrap();
            if is_in(peer.key, self.own_key, ring.successor.key) && peer.addr != *self.hub.local()
            {
                tracing::trace!(
                    "{:x} changed successor to {:x} by notification",
                    self.own_key,
                    peer.key
                );
                ring.successor = peer.clone();
            }
            if is_in(peer.key, ring.predecessor.key, self.own_key)
                && peer.addr != *self.hub.local()
            {
                tracing::trace!(
                    "{:x} changed predecessor to {:x} by notification",
                    self.own_key,
                    peer.key
                );
                ring.predecessor = peer.clone();
                adopted_predecessor = true;
            }
        }
        // From here on this node may receive requests for its new key range;
        // fetching that data performs requests of its own, so it must not
        // run on the handler path.
        if adopted_predecessor && !self.integrated.load(Ordering::SeqCst) {
            let index = Arc::clone(self);
            tokio::spawn(async move {
                index.integrate().await;
            });
        }
    }

    /// Pulls the keys this node has become responsible for from its
    /// successor.
    async fn integrate(self: Arc<Self>) {
        let _gate = self.integrate_gate.lock().await;
        if self.integrated.load(Ordering::SeqCst) {
            return;
        }
        let successor = self.ring.lock().unwrap().successor.clone();
        if successor.addr == *self.hub.local() {
            self.integrated.store(true, Ordering::SeqCst);
            return;
        }
        match self
            .hub
            .request(&successor.addr, RpcPayload::ChordFetchResponsibilities)
            .await
        {
            Ok(RpcPayload::ChordResponsibilities { entries }) => {
                for (key, value) in entries {
                    self.data.insert(key, value);
                }
                self.integrated.store(true, Ordering::SeqCst);
            }
            Ok(other) => {
                tracing::warn!("Unexpected responsibilities response: {:?}", other);
            }
            Err(e) => {
                tracing::warn!("Fetching responsibilities from {} failed: {}", successor.addr, e);
            }
        }
    }

    /// Entries that are NOT in `(requester, self]`; the requester has
    /// become responsible for them.
    fn responsibilities_for(&self, requester: &PeerAddr) -> Vec<(String, String)> {
        let requester_key = ring_hash(requester.as_str());
        self.data
            .iter()
            .filter(|entry| !is_in(ring_hash(entry.key()), requester_key, self.own_key))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
