use crate::core::error::MapError;
use crate::core::id::Id;
use crate::core::peer::PeerAddr;
use crate::core::time::LogicalTime;
use crate::hub::service::Hub;
use crate::hub::types::{ChunkRef, RpcPayload};
use crate::raft::node::RaftNode;
use crate::raft::types::{EntryPayload, RaftRole};
use crate::table::container::RowContainer;
use crate::table::descriptor::TableDescriptor;
use crate::table::revision::Revision;
use crate::transaction::chunk_transaction::ChunkTransaction;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pause between lock/commit submission rounds.
const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Default)]
struct LocalLock {
    locked: bool,
    lock_index: u64,
    depth: usize,
}

/// A chunk whose consistency backend is the replicated log.
///
/// The distributed write lock, row mutations and membership changes are all
/// log entries; an operation is done once its entry reaches the committed
/// prefix. Reads never take a lock; the committed prefix is immutable.
pub struct RaftChunk {
    id: Id,
    descriptor: Arc<TableDescriptor>,
    pub node: Arc<RaftNode>,
    hub: Arc<Hub>,
    /// Local view of the log-based write lock, serializing local writers.
    local_lock: tokio::sync::Mutex<LocalLock>,
    serial: AtomicU64,
}

impl RaftChunk {
    /// Creates a brand-new chunk with this peer as leader of its log.
    pub fn initialize_new(id: Id, descriptor: Arc<TableDescriptor>, hub: Arc<Hub>) -> Arc<Self> {
        let meta = ChunkRef {
            table: descriptor.name.clone(),
            chunk_id: id,
        };
        let node = RaftNode::new(meta, hub.clone(), Vec::new());
        node.start(true);
        Arc::new(Self {
            id,
            descriptor,
            node,
            hub,
            local_lock: tokio::sync::Mutex::new(LocalLock::default()),
            serial: AtomicU64::new(1),
        })
    }

    /// Creates a follower replica. The data arrives through log replay, so
    /// no state transfer is needed beyond the peer list.
    pub fn init_from_request(
        id: Id,
        descriptor: Arc<TableDescriptor>,
        hub: Arc<Hub>,
        peers: Vec<PeerAddr>,
    ) -> Arc<Self> {
        let meta = ChunkRef {
            table: descriptor.name.clone(),
            chunk_id: id,
        };
        let node = RaftNode::new(meta, hub.clone(), peers);
        node.start(false);
        Arc::new(Self {
            id,
            descriptor,
            node,
            hub,
            local_lock: tokio::sync::Mutex::new(LocalLock::default()),
            serial: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<TableDescriptor> {
        &self.descriptor
    }

    pub fn container(&self) -> &Arc<RowContainer> {
        &self.node.container
    }

    fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::SeqCst)
    }

    /// Submits one payload until its entry is committed; returns its index.
    async fn submit_committed(&self, payload: EntryPayload) -> u64 {
        let mut serial = self.next_serial();
        let mut retrying = false;
        while self.node.is_running() {
            let index = Arc::clone(&self.node)
                .submit(payload.clone(), serial, retrying)
                .await;
            if index > 0 {
                if self.node.check_if_entry_committed(index, serial).await {
                    return index;
                }
                // The entry was truncated and replaced under a leader change;
                // retrying under the same serial would dedup against the
                // replacement, so start over with a fresh one.
                serial = self.next_serial();
                retrying = false;
                continue;
            }
            retrying = true;
            tokio::time::sleep(SUBMIT_RETRY_DELAY).await;
        }
        0
    }

    // --- Write lock via the log ---

    /// Acquires the chunk write lock by committing a lock entry. Retries
    /// with fresh serial ids until the committed lock view names this peer.
    pub async fn write_lock(&self) {
        let mut local = self.local_lock.lock().await;
        if local.locked {
            local.depth += 1;
            return;
        }
        while self.node.is_running() {
            let serial = self.next_serial();
            let index = Arc::clone(&self.node)
                .submit(EntryPayload::Lock, serial, false)
                .await;
            if index > 0 && self.node.check_if_entry_committed(index, serial).await {
                let lock = self.node.lock_state();
                if lock.holder.as_ref() == Some(self.hub.local()) && lock.lock_index == index {
                    local.locked = true;
                    local.lock_index = index;
                    return;
                }
                // Someone else holds the lock; try again with a new entry.
            }
            tokio::time::sleep(SUBMIT_RETRY_DELAY).await;
        }
    }

    /// Read access needs no coordination: the committed prefix is immutable
    /// and the container admits whole revisions atomically.
    pub async fn read_lock(&self) {}

    pub async fn unlock(&self) {
        let mut local = self.local_lock.lock().await;
        if !local.locked {
            return;
        }
        if local.depth > 0 {
            local.depth -= 1;
            return;
        }
        let lock_index = local.lock_index;
        while self.node.is_running() {
            let serial = self.next_serial();
            let index = Arc::clone(&self.node)
                .submit(EntryPayload::Unlock { lock_index }, serial, false)
                .await;
            if index > 0 && self.node.check_if_entry_committed(index, serial).await {
                break;
            }
            tokio::time::sleep(SUBMIT_RETRY_DELAY).await;
        }
        assert!(
            self.node.lock_state().holder.as_ref() != Some(self.hub.local()),
            "chunk {} still locked after committed unlock",
            self.id
        );
        local.locked = false;
        local.lock_index = 0;
    }

    pub async fn is_write_locked(&self) -> bool {
        self.local_lock.lock().await.locked
    }

    // --- Membership ---

    /// Invites `peer`: ships it a follower bootstrap, then commits the
    /// membership change. Only the leader can do this.
    pub async fn request_participation(&self, peer: &PeerAddr) -> Result<bool, MapError> {
        if self.node.role() != RaftRole::Leader || self.node.has_peer(peer) {
            return Ok(false);
        }
        let mut peers = self.node.peer_list();
        peers.push(self.hub.local().clone());
        let accepted = self
            .hub
            .ack_request(
                peer,
                RpcPayload::RaftInit {
                    meta: ChunkRef {
                        table: self.descriptor.name.clone(),
                        chunk_id: self.id,
                    },
                    peers,
                    leader: self.hub.local().clone(),
                },
            )
            .await?;
        if !accepted {
            return Ok(false);
        }
        let index = self.submit_committed(EntryPayload::AddPeer(peer.clone())).await;
        Ok(index > 0)
    }

    /// Leaves the chunk: under the write lock, commit the removal, release
    /// the lock for the survivors and stop the local node. Data remains on
    /// the survivors.
    pub async fn leave(&self) {
        self.write_lock().await;
        let removed = self
            .submit_committed(EntryPayload::RemovePeer(self.hub.local().clone()))
            .await;
        self.unlock().await;
        if removed > 0 {
            tracing::info!("{} left raft chunk {}", self.hub.local(), self.id);
        }
        self.node.stop();
    }

    // --- Reads ---

    pub async fn dump_items(&self, time: LogicalTime) -> BTreeMap<Id, Arc<Revision>> {
        self.node.container.dump(time)
    }

    pub async fn num_items(&self, time: LogicalTime) -> usize {
        self.node.container.available_ids(time).len()
    }

    // --- Transactions and commit ---

    pub fn new_transaction(&self, start_time: LogicalTime) -> ChunkTransaction {
        ChunkTransaction::new(
            start_time,
            self.id,
            self.descriptor.clone(),
            self.node.container.clone(),
        )
    }

    pub async fn commit(&self, transaction: &ChunkTransaction) -> Result<(), MapError> {
        self.write_lock().await;
        if let Err(conflict) = self.check_locked(transaction).await {
            self.unlock().await;
            return Err(conflict);
        }
        let commit_time = self.hub.sample();
        self.commit_locked(transaction, commit_time).await;
        self.unlock().await;
        Ok(())
    }

    pub async fn check_locked(&self, transaction: &ChunkTransaction) -> Result<(), MapError> {
        assert!(
            self.is_write_locked().await,
            "conflict check on raft chunk {} without the lock",
            self.id
        );
        transaction.check_against(&self.node.container)
    }

    /// Applies a checked transaction at `commit_time` by committing one log
    /// entry per row. Caller must hold the write lock.
    pub async fn commit_locked(&self, transaction: &ChunkTransaction, commit_time: LogicalTime) {
        assert!(
            self.is_write_locked().await,
            "commit on raft chunk {} without the lock",
            self.id
        );

        for mut revision in transaction.insertions() {
            revision.chunk_id = self.id;
            revision.insert_time = commit_time;
            revision.update_time = commit_time;
            let index = self.submit_committed(EntryPayload::Insert(revision)).await;
            assert!(index > 0, "insert entry lost on raft chunk {}", self.id);
        }
        for mut revision in transaction.mutations() {
            revision.chunk_id = self.id;
            revision.update_time = commit_time;
            if let Some(insert_time) = self
                .node
                .container
                .item_history(revision.id, LogicalTime::MAX)
                .last()
                .map(|first| first.insert_time)
            {
                revision.insert_time = insert_time;
            }
            let index = self.submit_committed(EntryPayload::Update(revision)).await;
            assert!(index > 0, "update entry lost on raft chunk {}", self.id);
        }
    }

    /// Standalone insert outside a transaction.
    pub async fn insert(&self, values_revision: Revision) -> Result<(), MapError> {
        self.write_lock().await;
        if self.node.container.contains(values_revision.id) {
            self.unlock().await;
            return Err(MapError::InsertConflict(values_revision.id));
        }
        let mut revision = values_revision;
        revision.chunk_id = self.id;
        let time = self.hub.sample();
        revision.insert_time = time;
        revision.update_time = time;
        let index = self.submit_committed(EntryPayload::Insert(revision)).await;
        self.unlock().await;
        if index > 0 {
            Ok(())
        } else {
            Err(MapError::Rpc {
                peer: self.hub.local().clone(),
                reason: "raft node stopped before commit".into(),
            })
        }
    }
}
