use crate::chunk::lock::{ChunkLock, LockState};
use crate::chunk::triggers::TriggerSet;
use crate::core::error::MapError;
use crate::core::id::Id;
use crate::core::peer::PeerAddr;
use crate::core::time::LogicalTime;
use crate::hub::service::Hub;
use crate::hub::types::{ChunkRef, RpcPayload};
use crate::table::container::RowContainer;
use crate::table::descriptor::TableDescriptor;
use crate::table::revision::Revision;
use crate::transaction::chunk_transaction::ChunkTransaction;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// Back-off between distributed lock attempts after a decline.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(1);

/// One replica of a chunk, coordinated over the broadcast protocol.
///
/// All state mutation happens either under the distributed write lock or in
/// the patch path, which only ever runs while a remote peer holds that lock.
/// The peer set is mutated exclusively by the current writer.
pub struct Chunk {
    id: Id,
    descriptor: Arc<TableDescriptor>,
    pub container: Arc<RowContainer>,
    /// Replica peers, excluding the local address; ordered by address.
    peers: Mutex<BTreeSet<PeerAddr>>,
    lock: ChunkLock,
    /// Set once this peer has left the swarm; guarded separately from the
    /// distributed lock so request handlers can observe it cheaply.
    relinquished: RwLock<bool>,
    /// Serializes peer additions against the unlock fan-out.
    add_peer_gate: tokio::sync::Mutex<()>,
    pub triggers: TriggerSet,
    hub: Arc<Hub>,
}

impl Chunk {
    /// Creates a brand-new chunk with this peer as its only replica.
    pub fn initialize_new(id: Id, descriptor: Arc<TableDescriptor>, hub: Arc<Hub>) -> Arc<Self> {
        Arc::new(Self {
            id,
            descriptor,
            container: Arc::new(RowContainer::new()),
            peers: Mutex::new(BTreeSet::new()),
            lock: ChunkLock::new(),
            relinquished: RwLock::new(false),
            add_peer_gate: tokio::sync::Mutex::new(()),
            triggers: TriggerSet::new(),
            hub,
        })
    }

    /// Creates a replica from an init request sent by `sender`.
    ///
    /// The sender holds the distributed write lock for the duration of the
    /// join, so the local lock state starts out as held by it.
    pub fn init_from_request(
        id: Id,
        descriptor: Arc<TableDescriptor>,
        hub: Arc<Hub>,
        sender: PeerAddr,
        peers: Vec<PeerAddr>,
        revisions: Vec<Revision>,
    ) -> Arc<Self> {
        let container = Arc::new(RowContainer::new());
        for revision in revisions {
            container.patch(revision);
        }
        let local = hub.local().clone();
        let peer_set: BTreeSet<PeerAddr> = peers.into_iter().filter(|peer| *peer != local).collect();
        Arc::new(Self {
            id,
            descriptor,
            container,
            peers: Mutex::new(peer_set),
            lock: ChunkLock::new_held_by(sender),
            relinquished: RwLock::new(false),
            add_peer_gate: tokio::sync::Mutex::new(()),
            triggers: TriggerSet::new(),
            hub,
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<TableDescriptor> {
        &self.descriptor
    }

    fn meta(&self) -> ChunkRef {
        ChunkRef {
            table: self.descriptor.name.clone(),
            chunk_id: self.id,
        }
    }

    /// Replica peers in ascending address order, local address excluded.
    pub fn peer_list(&self) -> Vec<PeerAddr> {
        self.peers.lock().unwrap().iter().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    fn local(&self) -> &PeerAddr {
        self.hub.local()
    }

    // --- Distributed reader/writer lock ---

    /// Acquires the distributed write lock.
    ///
    /// Sends a lock request to every peer in ascending address order; any
    /// decline aborts the round, backs off briefly and retries. The
    /// lowest-address peer always wins concurrent attempts, which guarantees
    /// progress.
    pub async fn write_lock(&self) {
        let reentered = self.lock.mutate(|state| {
            if let LockState::WriteLocked { holder, depth } = state {
                if *holder == *self.local() {
                    *depth += 1;
                    return true;
                }
            }
            false
        });
        if reentered {
            return;
        }

        loop {
            self.lock
                .wait_map(|state| match state {
                    LockState::Unlocked | LockState::Attempting => {
                        *state = LockState::Attempting;
                        Some(())
                    }
                    _ => None,
                })
                .await;

            let peers = self.peer_list();
            let mut declined_by = None;
            for peer in &peers {
                match self
                    .hub
                    .ack_request(peer, RpcPayload::ChunkLock { meta: self.meta() })
                    .await
                {
                    Ok(true) => {
                        tracing::trace!("{} got chunk {} lock from {}", self.local(), self.id, peer);
                    }
                    Ok(false) => {
                        // Assuming no connection loss, only the peer with the
                        // lowest address may decline.
                        declined_by = Some(peer.clone());
                        break;
                    }
                    Err(e) => panic!("lock request for chunk {} to {} failed: {}", self.id, peer, e),
                }
            }

            match declined_by {
                Some(peer) => {
                    tracing::debug!(
                        "{} lost chunk {} lock round to {}, retrying",
                        self.local(),
                        self.id,
                        peer
                    );
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                None => break,
            }
        }

        self.lock.mutate(|state| {
            debug_assert_eq!(*state, LockState::Attempting);
            *state = LockState::WriteLocked {
                holder: self.local().clone(),
                depth: 1,
            };
        });
    }

    /// Acquires the read lock. Readers never coordinate with remote peers;
    /// the write protocol guarantees remote quiescence. The local write
    /// holder may read-lock reentrantly.
    pub async fn read_lock(&self) {
        self.lock
            .wait_map(|state| match state {
                LockState::WriteLocked { holder, depth } if *holder == *self.local() => {
                    *depth += 1;
                    Some(())
                }
                LockState::Unlocked => {
                    *state = LockState::ReadLocked { readers: 1 };
                    Some(())
                }
                LockState::ReadLocked { readers } => {
                    *readers += 1;
                    Some(())
                }
                _ => None,
            })
            .await;
    }

    /// Releases whichever lock the caller holds.
    ///
    /// A write release fans the unlock out in reverse address order, and the
    /// local state flips to unlocked at the position where the local address
    /// falls in that order: once a peer with a lower address considers the
    /// lock free, so does every peer above it.
    pub async fn unlock(&self) {
        enum Release {
            Done,
            Write(Vec<PeerAddr>),
        }

        let release = self.lock.mutate(|state| match state {
            LockState::Unlocked => panic!("unlock of unlocked chunk {}", self.id),
            LockState::Attempting => panic!("cannot abort a lock attempt on chunk {}", self.id),
            LockState::ReadLocked { readers } => {
                *readers -= 1;
                if *readers == 0 {
                    *state = LockState::Unlocked;
                }
                Release::Done
            }
            LockState::WriteLocked { holder, depth } => {
                if *holder != *self.local() {
                    panic!("unlock of chunk {} write-locked by {}", self.id, holder);
                }
                *depth -= 1;
                if *depth > 0 {
                    Release::Done
                } else {
                    Release::Write(self.peers.lock().unwrap().iter().cloned().collect())
                }
            }
        });

        let peers = match release {
            Release::Done => return,
            Release::Write(peers) => peers,
        };

        let _gate = self.add_peer_gate.lock().await;
        let mut self_unlocked = false;
        for peer in peers.iter().rev() {
            if !self_unlocked && peer < self.local() {
                self.lock.mutate(|state| *state = LockState::Unlocked);
                self_unlocked = true;
            }
            match self
                .hub
                .ack_request(peer, RpcPayload::ChunkUnlock { meta: self.meta() })
                .await
            {
                Ok(true) => {
                    tracing::trace!("{} released chunk {} lock at {}", self.local(), self.id, peer);
                }
                Ok(false) => panic!("peer {} refused unlock of chunk {}", peer, self.id),
                Err(e) => panic!("unlock of chunk {} at {} failed: {}", self.id, peer, e),
            }
        }
        if !self_unlocked {
            // Local address is the lowest in the swarm.
            self.lock.mutate(|state| *state = LockState::Unlocked);
        }
    }

    pub fn is_write_locked_by_self(&self) -> bool {
        self.lock.is_writer(self.local())
    }

    // --- Membership ---

    /// Invites `peer` into the replica set. Returns true if the peer was
    /// added by this call.
    pub async fn request_participation(&self, peer: &PeerAddr) -> Result<bool, MapError> {
        self.write_lock().await;
        let already_in = self.peers.lock().unwrap().contains(peer);
        let added = if already_in {
            false
        } else {
            self.add_peer(peer.clone()).await?
        };
        self.unlock().await;
        Ok(added)
    }

    /// Adds a peer while holding the distributed write lock: ships the full
    /// chunk state to the newcomer, announces it to the current swarm, then
    /// records it locally.
    pub async fn add_peer(&self, peer: PeerAddr) -> Result<bool, MapError> {
        let _gate = self.add_peer_gate.lock().await;
        assert!(
            self.is_write_locked_by_self(),
            "add_peer on chunk {} without the write lock",
            self.id
        );
        if self.peers.lock().unwrap().contains(&peer) {
            panic!("peer {} already in swarm of chunk {}", peer, self.id);
        }

        let mut init_peers = self.peer_list();
        init_peers.push(self.local().clone());
        let accepted = self
            .hub
            .ack_request(
                &peer,
                RpcPayload::ChunkInit {
                    meta: self.meta(),
                    peers: init_peers,
                    revisions: self.container.all_revisions(),
                },
            )
            .await?;
        if !accepted {
            return Ok(false);
        }

        // The newcomer is not yet known to the rest of the swarm; one last
        // message under the old configuration announces it.
        let current = self.peer_list();
        self.hub
            .undisputable_broadcast(
                &current,
                RpcPayload::ChunkNewPeer {
                    meta: self.meta(),
                    new_peer: peer.clone(),
                },
            )
            .await;

        self.peers.lock().unwrap().insert(peer);
        Ok(true)
    }

    /// Leaves the swarm: under the write lock, announce departure and mark
    /// this replica relinquished. Further inbound requests are declined.
    pub async fn leave(&self) {
        self.write_lock().await;
        {
            let mut relinquished = self.relinquished.write().await;
            let peers = self.peer_list();
            self.hub
                .undisputable_broadcast(&peers, RpcPayload::ChunkLeave { meta: self.meta() })
                .await;
            *relinquished = true;
        }
        self.unlock().await;
    }

    // --- Reads ---

    pub async fn dump_items(&self, time: LogicalTime) -> BTreeMap<Id, Arc<Revision>> {
        self.read_lock().await;
        let items = self.container.dump(time);
        self.unlock().await;
        items
    }

    pub async fn num_items(&self, time: LogicalTime) -> usize {
        self.read_lock().await;
        let count = self.container.available_ids(time).len();
        self.unlock().await;
        count
    }

    // --- Transactions and commit ---

    pub fn new_transaction(&self, start_time: LogicalTime) -> ChunkTransaction {
        ChunkTransaction::new(
            start_time,
            self.id,
            self.descriptor.clone(),
            self.container.clone(),
        )
    }

    /// Commits a chunk transaction against this replica: lock, check, apply,
    /// unlock. The conflict check under the lock is authoritative.
    pub async fn commit(&self, transaction: &ChunkTransaction) -> Result<(), MapError> {
        self.write_lock().await;
        if let Err(conflict) = self.check_locked(transaction) {
            self.unlock().await;
            return Err(conflict);
        }
        let commit_time = self.hub.sample();
        self.commit_locked(transaction, commit_time).await;
        self.unlock().await;
        Ok(())
    }

    /// Runs the conflict rules against current chunk state. Caller must hold
    /// the write lock.
    pub fn check_locked(&self, transaction: &ChunkTransaction) -> Result<(), MapError> {
        assert!(
            self.is_write_locked_by_self(),
            "conflict check on chunk {} without the write lock",
            self.id
        );
        transaction.check_against(&self.container)
    }

    /// Applies a checked transaction at `commit_time` and broadcasts every
    /// applied revision. Caller must hold the write lock.
    pub async fn commit_locked(&self, transaction: &ChunkTransaction, commit_time: LogicalTime) {
        assert!(
            self.is_write_locked_by_self(),
            "commit on chunk {} without the write lock",
            self.id
        );
        let peers = self.peer_list();

        for mut revision in transaction.insertions() {
            revision.chunk_id = self.id;
            self.container
                .insert(commit_time, revision.clone())
                .unwrap_or_else(|e| panic!("checked insert failed on chunk {}: {}", self.id, e));
            // The container has stamped the revision; replicas can patch the
            // fully-populated copy directly.
            let stored = self
                .container
                .get_by_id(revision.id, commit_time)
                .map(|r| (*r).clone())
                .unwrap_or_else(|| panic!("inserted revision vanished on chunk {}", self.id));
            self.hub
                .undisputable_broadcast(
                    &peers,
                    RpcPayload::ChunkInsert {
                        meta: self.meta(),
                        revision: stored,
                    },
                )
                .await;
        }

        for mut revision in transaction.mutations() {
            revision.chunk_id = self.id;
            self.container
                .update(commit_time, revision.clone())
                .unwrap_or_else(|e| panic!("checked update failed on chunk {}: {}", self.id, e));
            let stored = self
                .container
                .get_by_id(revision.id, commit_time)
                .map(|r| (*r).clone())
                .unwrap_or_else(|| panic!("updated revision vanished on chunk {}", self.id));
            self.hub
                .undisputable_broadcast(
                    &peers,
                    RpcPayload::ChunkUpdate {
                        meta: self.meta(),
                        revision: stored,
                    },
                )
                .await;
        }
    }

    // --- Request handlers ---

    /// A peer asks to join. Adding it needs the write lock, which the RPC
    /// path may hold transitively, so the actual work detaches onto its own
    /// task and the request is acknowledged immediately.
    pub async fn handle_connect_request(self: &Arc<Self>, peer: PeerAddr) -> RpcPayload {
        if *self.relinquished.read().await {
            return RpcPayload::Decline;
        }
        let chunk = Arc::clone(self);
        tokio::spawn(async move {
            let relinquished = chunk.relinquished.read().await;
            assert!(
                !*relinquished,
                "chunk {} left before handling a connect request",
                chunk.id
            );
            chunk.write_lock().await;
            let already_in = chunk.peers.lock().unwrap().contains(&peer);
            if already_in {
                tracing::info!(
                    "Peer {} requesting to join chunk {} already in swarm",
                    peer,
                    chunk.id
                );
            } else if let Err(e) = chunk.add_peer(peer.clone()).await {
                tracing::warn!("Adding {} to chunk {} failed: {}", peer, chunk.id, e);
            }
            chunk.unlock().await;
        });
        RpcPayload::Ack
    }

    /// A committed insert from the current remote writer.
    pub async fn handle_insert_request(&self, revision: Revision) -> RpcPayload {
        if *self.relinquished.read().await {
            return RpcPayload::Decline;
        }
        // An insert may not arrive while this peer believes it is the
        // writer; inserts are propagated under the sender's lock.
        assert!(
            !self.is_write_locked_by_self(),
            "remote insert while chunk {} is locally write-locked",
            self.id
        );
        let id = revision.id;
        self.container.patch(revision);
        self.triggers.note_inserted(id);
        RpcPayload::Ack
    }

    /// A committed update from the current remote writer.
    pub async fn handle_update_request(&self, sender: PeerAddr, revision: Revision) -> RpcPayload {
        assert!(
            self.lock.is_writer(&sender),
            "update for chunk {} from {} which does not hold the lock",
            self.id,
            sender
        );
        let id = revision.id;
        self.container.patch(revision);
        self.triggers.note_updated(id);
        RpcPayload::Ack
    }

    /// Lock acquisition round from a remote writer.
    pub async fn handle_lock_request(&self, locker: PeerAddr) -> RpcPayload {
        if *self.relinquished.read().await {
            // Possible when two peers lock for leaving at the same time.
            return RpcPayload::Decline;
        }
        let granted = self
            .lock
            .wait_map(|state| match state {
                // Readers drain before the lock request is answered.
                LockState::ReadLocked { .. } => None,
                LockState::Unlocked => {
                    *state = LockState::WriteLocked {
                        holder: locker.clone(),
                        depth: 0,
                    };
                    Some(true)
                }
                LockState::WriteLocked { .. } => Some(false),
                LockState::Attempting => {
                    // Two peers are attempting at once and the remote one
                    // does not know yet whether it is losing. Decline only
                    // if the local address is the lowest in the swarm.
                    let lowest_remote = self.peers.lock().unwrap().iter().next().cloned();
                    let self_is_lowest =
                        lowest_remote.map_or(true, |lowest| *self.local() < lowest);
                    if self_is_lowest {
                        assert!(
                            *self.local() < locker,
                            "lowest peer {} received a lock request from lower peer {}",
                            self.local(),
                            locker
                        );
                        Some(false)
                    } else {
                        // No rollback needed: the requester can only be here
                        // after winning every lower-address peer.
                        *state = LockState::WriteLocked {
                            holder: locker.clone(),
                            depth: 0,
                        };
                        Some(true)
                    }
                }
            })
            .await;
        if granted {
            RpcPayload::Ack
        } else {
            RpcPayload::Decline
        }
    }

    /// Lock release from the remote writer. Ends the remote commit interval,
    /// so accumulated trigger ids are dispatched here.
    pub async fn handle_unlock_request(&self, locker: PeerAddr) -> RpcPayload {
        assert!(
            !*self.relinquished.read().await,
            "unlock for relinquished chunk {}",
            self.id
        );
        self.lock.mutate(|state| match state {
            LockState::WriteLocked { holder, .. } if *holder == locker => {
                *state = LockState::Unlocked;
            }
            other => panic!(
                "unlock of chunk {} from {} in state {:?}",
                self.id, locker, other
            ),
        });
        self.triggers.dispatch();
        RpcPayload::Ack
    }

    /// Membership announcement from the current writer.
    pub async fn handle_new_peer_request(&self, sender: PeerAddr, new_peer: PeerAddr) -> RpcPayload {
        assert!(
            !*self.relinquished.read().await,
            "new-peer request for relinquished chunk {}",
            self.id
        );
        assert!(
            self.lock.is_writer(&sender),
            "new-peer request for chunk {} from {} which does not hold the lock",
            self.id,
            sender
        );
        self.peers.lock().unwrap().insert(new_peer);
        RpcPayload::Ack
    }

    /// Departure announcement from the current writer.
    pub async fn handle_leave_request(&self, leaver: PeerAddr) -> RpcPayload {
        assert!(
            !*self.relinquished.read().await,
            "leave request for relinquished chunk {}",
            self.id
        );
        assert!(
            self.lock.is_writer(&leaver),
            "leave request for chunk {} from {} which does not hold the lock",
            self.id,
            leaver
        );
        self.peers.lock().unwrap().remove(&leaver);
        self.hub.mark_left(&leaver);
        RpcPayload::Ack
    }
}
