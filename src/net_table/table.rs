use crate::chord::index::ChordIndex;
use crate::chunk::chunk::Chunk;
use crate::core::error::MapError;
use crate::core::id::Id;
use crate::core::peer::PeerAddr;
use crate::core::time::LogicalTime;
use crate::hub::service::Hub;
use crate::hub::types::RpcPayload;
use crate::raft::chunk::RaftChunk;
use crate::table::container::RowContainer;
use crate::table::descriptor::TableDescriptor;
use crate::table::file_io;
use crate::table::revision::Revision;
use crate::transaction::chunk_transaction::ChunkTransaction;
use crate::transaction::net_transaction::NetTableTransaction;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Consistency backend used for every chunk of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBackend {
    /// Distributed reader/writer lock plus commit broadcast.
    Broadcast,
    /// Replicated log; mutations and membership are log entries.
    Raft,
}

/// A chunk under either backend.
#[derive(Clone)]
pub enum ChunkHandle {
    Legacy(Arc<Chunk>),
    Raft(Arc<RaftChunk>),
}

impl ChunkHandle {
    pub fn id(&self) -> Id {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.id(),
            ChunkHandle::Raft(chunk) => chunk.id(),
        }
    }

    pub fn container(&self) -> &Arc<RowContainer> {
        match self {
            ChunkHandle::Legacy(chunk) => &chunk.container,
            ChunkHandle::Raft(chunk) => chunk.container(),
        }
    }

    pub fn new_transaction(&self, start_time: LogicalTime) -> ChunkTransaction {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.new_transaction(start_time),
            ChunkHandle::Raft(chunk) => chunk.new_transaction(start_time),
        }
    }

    pub async fn write_lock(&self) {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.write_lock().await,
            ChunkHandle::Raft(chunk) => chunk.write_lock().await,
        }
    }

    pub async fn read_lock(&self) {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.read_lock().await,
            ChunkHandle::Raft(chunk) => chunk.read_lock().await,
        }
    }

    pub async fn unlock(&self) {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.unlock().await,
            ChunkHandle::Raft(chunk) => chunk.unlock().await,
        }
    }

    pub async fn check_locked(&self, transaction: &ChunkTransaction) -> Result<(), MapError> {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.check_locked(transaction),
            ChunkHandle::Raft(chunk) => chunk.check_locked(transaction).await,
        }
    }

    pub async fn commit_locked(&self, transaction: &ChunkTransaction, commit_time: LogicalTime) {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.commit_locked(transaction, commit_time).await,
            ChunkHandle::Raft(chunk) => chunk.commit_locked(transaction, commit_time).await,
        }
    }

    pub async fn commit(&self, transaction: &ChunkTransaction) -> Result<(), MapError> {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.commit(transaction).await,
            ChunkHandle::Raft(chunk) => chunk.commit(transaction).await,
        }
    }

    pub async fn request_participation(&self, peer: &PeerAddr) -> Result<bool, MapError> {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.request_participation(peer).await,
            ChunkHandle::Raft(chunk) => chunk.request_participation(peer).await,
        }
    }

    pub async fn leave(&self) {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.leave().await,
            ChunkHandle::Raft(chunk) => chunk.leave().await,
        }
    }

    pub async fn dump_items(&self, time: LogicalTime) -> BTreeMap<Id, Arc<Revision>> {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.dump_items(time).await,
            ChunkHandle::Raft(chunk) => chunk.dump_items(time).await,
        }
    }

    pub async fn num_items(&self, time: LogicalTime) -> usize {
        match self {
            ChunkHandle::Legacy(chunk) => chunk.num_items(time).await,
            ChunkHandle::Raft(chunk) => chunk.num_items(time).await,
        }
    }
}

/// Index over the chunks of one table held by this peer.
pub struct NetTable {
    descriptor: Arc<TableDescriptor>,
    backend: ChunkBackend,
    hub: Arc<Hub>,
    chunks: DashMap<Id, ChunkHandle>,
    /// Chunk-to-peer directory, when this node participates in the ring.
    directory: Option<Arc<ChordIndex>>,
}

impl NetTable {
    pub fn new(
        descriptor: TableDescriptor,
        backend: ChunkBackend,
        hub: Arc<Hub>,
        directory: Option<Arc<ChordIndex>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor: Arc::new(descriptor),
            backend,
            hub,
            chunks: DashMap::new(),
            directory,
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<TableDescriptor> {
        &self.descriptor
    }

    pub fn backend(&self) -> ChunkBackend {
        self.backend
    }

    /// Creates a chunk with a fresh id, this peer being its first replica.
    pub async fn new_chunk(&self) -> ChunkHandle {
        self.new_chunk_with_id(Id::new()).await
    }

    pub async fn new_chunk_with_id(&self, id: Id) -> ChunkHandle {
        let handle = match self.backend {
            ChunkBackend::Broadcast => ChunkHandle::Legacy(Chunk::initialize_new(
                id,
                self.descriptor.clone(),
                self.hub.clone(),
            )),
            ChunkBackend::Raft => ChunkHandle::Raft(RaftChunk::initialize_new(
                id,
                self.descriptor.clone(),
                self.hub.clone(),
            )),
        };
        self.chunks.insert(id, handle.clone());
        self.publish_chunk_holder(id).await;
        handle
    }

    pub fn get_chunk(&self, id: Id) -> Option<ChunkHandle> {
        self.chunks.get(&id).map(|entry| entry.value().clone())
    }

    /// Chunk handles in ascending chunk-id order.
    pub fn chunk_list(&self) -> Vec<ChunkHandle> {
        let mut ordered: Vec<ChunkHandle> =
            self.chunks.iter().map(|entry| entry.value().clone()).collect();
        ordered.sort_by_key(|chunk| chunk.id());
        ordered
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Resolves a row across every local chunk at `time`.
    pub fn get_by_id(&self, id: Id, time: LogicalTime) -> Option<Revision> {
        for entry in self.chunks.iter() {
            if let Some(revision) = entry.value().container().get_by_id(id, time) {
                if !revision.is_removed() {
                    return Some((*revision).clone());
                }
            }
        }
        None
    }

    /// Opens a transaction scoped to the current logical time.
    pub fn new_transaction(self: &Arc<Self>) -> NetTableTransaction {
        NetTableTransaction::new(self.clone(), self.hub.sample())
    }

    pub fn new_transaction_at(self: &Arc<Self>, start_time: LogicalTime) -> NetTableTransaction {
        NetTableTransaction::new(self.clone(), start_time)
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    // --- Directory integration ---

    fn directory_key(&self, chunk_id: Id) -> String {
        format!("{}/{}", self.descriptor.name, chunk_id.hex())
    }

    /// Publishes this peer as a holder of `chunk_id` in the ring directory.
    async fn publish_chunk_holder(&self, chunk_id: Id) {
        if let Some(directory) = &self.directory {
            let key = self.directory_key(chunk_id);
            let value = self.hub.local().as_str().to_string();
            if let Err(e) = directory.add_data(key, value).await {
                tracing::warn!(
                    "Publishing chunk {} of table {} in the directory failed: {}",
                    chunk_id,
                    self.descriptor.name,
                    e
                );
            }
        }
    }

    /// Looks up which peer holds `chunk_id`, via the ring directory.
    pub async fn lookup_chunk_holder(&self, chunk_id: Id) -> Option<PeerAddr> {
        let directory = self.directory.as_ref()?;
        match directory.retrieve_data(self.directory_key(chunk_id)).await {
            Ok(Some(holder)) => Some(PeerAddr::new(holder)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Directory lookup for chunk {} failed: {}", chunk_id, e);
                None
            }
        }
    }

    // --- Persistence ---

    /// Writes the latest revision of every row of every local chunk at
    /// `time` to a dump file.
    pub async fn store_to_file(&self, path: &Path, time: LogicalTime) -> anyhow::Result<()> {
        let mut revisions = Vec::new();
        for chunk in self.chunk_list() {
            for (_, revision) in chunk.dump_items(time).await {
                if !revision.is_removed() {
                    revisions.push((*revision).clone());
                }
            }
        }
        file_io::store_revisions(path, &revisions)
    }

    /// Replays a dump file into a fresh transaction and commits it. Chunks
    /// are recreated under their stored ids as needed.
    pub async fn restore_from_file(self: &Arc<Self>, path: &Path) -> anyhow::Result<()> {
        let revisions = file_io::load_revisions(path)?;
        let mut transaction = self.new_transaction();
        for revision in revisions {
            let chunk_id = revision.chunk_id;
            let chunk = match self.get_chunk(chunk_id) {
                Some(chunk) => chunk,
                None => self.new_chunk_with_id(chunk_id).await,
            };
            transaction.insert(&chunk, revision);
        }
        transaction
            .commit()
            .await
            .map_err(|e| anyhow::anyhow!("restore commit failed: {}", e))
    }

    // --- Inbound request routing ---

    /// Handles a chunk-scoped request addressed to this table.
    pub async fn handle_chunk_rpc(&self, sender: PeerAddr, payload: RpcPayload) -> RpcPayload {
        match payload {
            RpcPayload::ChunkInit {
                meta,
                peers,
                revisions,
            } => {
                let chunk = Chunk::init_from_request(
                    meta.chunk_id,
                    self.descriptor.clone(),
                    self.hub.clone(),
                    sender,
                    peers,
                    revisions,
                );
                self.chunks
                    .insert(meta.chunk_id, ChunkHandle::Legacy(chunk));
                self.publish_chunk_holder(meta.chunk_id).await;
                RpcPayload::Ack
            }
            RpcPayload::RaftInit { meta, peers, .. } => {
                let chunk = RaftChunk::init_from_request(
                    meta.chunk_id,
                    self.descriptor.clone(),
                    self.hub.clone(),
                    peers,
                );
                self.chunks.insert(meta.chunk_id, ChunkHandle::Raft(chunk));
                self.publish_chunk_holder(meta.chunk_id).await;
                RpcPayload::Ack
            }
            RpcPayload::ChunkConnect { meta } => match self.legacy_chunk(meta.chunk_id) {
                Some(chunk) => chunk.handle_connect_request(sender).await,
                None => RpcPayload::Decline,
            },
            RpcPayload::ChunkInsert { meta, revision } => match self.legacy_chunk(meta.chunk_id) {
                Some(chunk) => chunk.handle_insert_request(revision).await,
                None => RpcPayload::Decline,
            },
            RpcPayload::ChunkUpdate { meta, revision } => match self.legacy_chunk(meta.chunk_id) {
                Some(chunk) => chunk.handle_update_request(sender, revision).await,
                None => RpcPayload::Decline,
            },
            RpcPayload::ChunkLock { meta } => match self.legacy_chunk(meta.chunk_id) {
                Some(chunk) => chunk.handle_lock_request(sender).await,
                None => RpcPayload::Decline,
            },
            RpcPayload::ChunkUnlock { meta } => match self.legacy_chunk(meta.chunk_id) {
                Some(chunk) => chunk.handle_unlock_request(sender).await,
                None => RpcPayload::Decline,
            },
            RpcPayload::ChunkNewPeer { meta, new_peer } => {
                match self.legacy_chunk(meta.chunk_id) {
                    Some(chunk) => chunk.handle_new_peer_request(sender, new_peer).await,
                    None => RpcPayload::Decline,
                }
            }
            RpcPayload::ChunkLeave { meta } => match self.legacy_chunk(meta.chunk_id) {
                Some(chunk) => chunk.handle_leave_request(sender).await,
                None => RpcPayload::Decline,
            },
            RpcPayload::RaftAppendEntries { meta, request } => {
                match self.raft_chunk(meta.chunk_id) {
                    Some(chunk) => RpcPayload::RaftAppendEntriesResponse(
                        chunk.node.handle_append_entries(sender, request),
                    ),
                    None => RpcPayload::Decline,
                }
            }
            RpcPayload::RaftRequestVote { meta, request } => {
                match self.raft_chunk(meta.chunk_id) {
                    Some(chunk) => RpcPayload::RaftVoteResponse(
                        chunk.node.handle_request_vote(sender, request),
                    ),
                    None => RpcPayload::Decline,
                }
            }
            RpcPayload::RaftClientAppend { meta, request } => {
                match self.raft_chunk(meta.chunk_id) {
                    Some(chunk) => RpcPayload::RaftClientAppendResponse(
                        chunk.node.handle_client_append(sender, request),
                    ),
                    None => RpcPayload::Decline,
                }
            }
            other => {
                tracing::warn!(
                    "Table {} received a request it cannot handle: {:?}",
                    self.descriptor.name,
                    other
                );
                RpcPayload::Decline
            }
        }
    }

    fn legacy_chunk(&self, id: Id) -> Option<Arc<Chunk>> {
        match self.get_chunk(id) {
            Some(ChunkHandle::Legacy(chunk)) => Some(chunk),
            Some(ChunkHandle::Raft(_)) => {
                tracing::warn!("Broadcast-protocol request for raft chunk {}", id);
                None
            }
            None => {
                tracing::warn!("Request for unknown chunk {}", id);
                None
            }
        }
    }

    fn raft_chunk(&self, id: Id) -> Option<Arc<RaftChunk>> {
        match self.get_chunk(id) {
            Some(ChunkHandle::Raft(chunk)) => Some(chunk),
            Some(ChunkHandle::Legacy(_)) => {
                tracing::warn!("Raft request for broadcast-protocol chunk {}", id);
                None
            }
            None => {
                tracing::warn!("Request for unknown chunk {}", id);
                None
            }
        }
    }

    /// Stops background machinery of every chunk (raft nodes); part of the
    /// explicit shutdown sequence.
    pub fn shutdown(&self) {
        for entry in self.chunks.iter() {
            if let ChunkHandle::Raft(chunk) = entry.value() {
                chunk.node.stop();
            }
        }
    }
}
