use crate::core::context::Core;
use crate::core::peer::PeerAddr;
use crate::hub::types::{Envelope, RpcPayload};

use axum::{extract::Extension, Json};
use std::sync::Arc;

/// The single inbound RPC endpoint.
///
/// Merges the sender's logical time, routes the payload and answers with a
/// freshly stamped envelope.
pub async fn handle_rpc(
    Extension(core): Extension<Arc<Core>>,
    Json(envelope): Json<Envelope>,
) -> Json<Envelope> {
    core.hub.clock.merge(envelope.logical_time);
    let reply = dispatch(&core, envelope.sender, envelope.payload).await;
    Json(core.hub.wrap(reply))
}

async fn dispatch(core: &Arc<Core>, sender: PeerAddr, payload: RpcPayload) -> RpcPayload {
    if let Some(table_name) = chunk_scoped_table(&payload) {
        let Some(table) = core.get_table(table_name) else {
            tracing::warn!("Request from {} for unknown table {}", sender, table_name);
            return RpcPayload::Decline;
        };
        return table.handle_chunk_rpc(sender, payload).await;
    }

    match payload {
        RpcPayload::ChordGetSuccessor
        | RpcPayload::ChordGetPredecessor
        | RpcPayload::ChordClosestPrecedingFinger { .. }
        | RpcPayload::ChordNotify
        | RpcPayload::ChordAddData { .. }
        | RpcPayload::ChordRetrieveData { .. }
        | RpcPayload::ChordFetchResponsibilities => {
            core.directory.handle_request(sender, payload).await
        }
        other => {
            tracing::warn!("Unroutable request from {}: {:?}", sender, other);
            RpcPayload::Decline
        }
    }
}

/// Table name of a chunk-scoped request, if the payload is one.
fn chunk_scoped_table(payload: &RpcPayload) -> Option<&str> {
    match payload {
        RpcPayload::ChunkConnect { meta, .. }
        | RpcPayload::ChunkInit { meta, .. }
        | RpcPayload::ChunkInsert { meta, .. }
        | RpcPayload::ChunkUpdate { meta, .. }
        | RpcPayload::ChunkLeave { meta, .. }
        | RpcPayload::ChunkLock { meta, .. }
        | RpcPayload::ChunkUnlock { meta, .. }
        | RpcPayload::ChunkNewPeer { meta, .. }
        | RpcPayload::RaftInit { meta, .. }
        | RpcPayload::RaftAppendEntries { meta, .. }
        | RpcPayload::RaftRequestVote { meta, .. }
        | RpcPayload::RaftClientAppend { meta, .. } => Some(meta.table.as_str()),
        _ => None,
    }
}
