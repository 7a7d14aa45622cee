//! Raft-backed chunks over real loopback RPC: replication to joined peers,
//! survival of leader loss, and commit of new writes under the new leader.

mod common;

use common::{spawn_node, wait_until, TestNode};
use peermap::core::id::Id;
use peermap::core::time::LogicalTime;
use peermap::net_table::table::{ChunkBackend, ChunkHandle};
use peermap::raft::chunk::RaftChunk;
use peermap::raft::types::RaftRole;
use peermap::table::revision::{FieldValue, Revision};

use std::sync::Arc;
use std::time::Duration;

fn raft_chunk(node: &TestNode, chunk_id: Id) -> Arc<RaftChunk> {
    match node.table().get_chunk(chunk_id) {
        Some(ChunkHandle::Raft(chunk)) => chunk,
        _ => panic!("raft chunk {} missing on {}", chunk_id, node.addr),
    }
}

fn row(id: Id, value: i64) -> Revision {
    Revision::new(id, vec![FieldValue::I64(value)])
}

async fn three_replicas() -> (TestNode, TestNode, TestNode, Id) {
    let a = spawn_node(ChunkBackend::Raft, None).await;
    let b = spawn_node(ChunkBackend::Raft, None).await;
    let c = spawn_node(ChunkBackend::Raft, None).await;

    let chunk = match a.table().new_chunk().await {
        ChunkHandle::Raft(chunk) => chunk,
        _ => unreachable!(),
    };
    assert!(chunk.request_participation(&b.addr).await.unwrap());
    assert!(chunk.request_participation(&c.addr).await.unwrap());
    let chunk_id = chunk.id();

    (a, b, c, chunk_id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn committed_entries_replicate_to_every_peer() {
    let (a, b, c, chunk_id) = three_replicas().await;

    let ids: Vec<Id> = (0..10).map(|_| Id::new()).collect();
    let leader_chunk = raft_chunk(&a, chunk_id);
    for (index, id) in ids.iter().enumerate() {
        leader_chunk.insert(row(*id, index as i64)).await.unwrap();
    }

    for node in [&a, &b, &c] {
        let chunk = raft_chunk(node, chunk_id);
        let ids = ids.clone();
        wait_until(
            "all inserts to reach every replica",
            Duration::from_secs(10),
            move || {
                ids.iter()
                    .all(|id| chunk.container().get_by_id(*id, LogicalTime::MAX).is_some())
            },
        )
        .await;
    }

    a.kill();
    b.kill();
    c.kill();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn a_new_leader_emerges_after_the_leader_dies() {
    let (a, b, c, chunk_id) = three_replicas().await;

    // Seed some committed entries under the original leader.
    let leader_chunk = raft_chunk(&a, chunk_id);
    let seeded: Vec<Id> = (0..5).map(|_| Id::new()).collect();
    for (index, id) in seeded.iter().enumerate() {
        leader_chunk.insert(row(*id, index as i64)).await.unwrap();
    }
    let survivors = [raft_chunk(&b, chunk_id), raft_chunk(&c, chunk_id)];
    for chunk in &survivors {
        let chunk = chunk.clone();
        let seeded = seeded.clone();
        wait_until("seed replication", Duration::from_secs(10), move || {
            seeded
                .iter()
                .all(|id| chunk.container().get_by_id(*id, LogicalTime::MAX).is_some())
        })
        .await;
    }

    a.kill();

    // Within a few election timeouts exactly one survivor leads.
    let probe = survivors.clone();
    wait_until(
        "a survivor to win the election",
        Duration::from_secs(10),
        move || {
            let leaders = probe
                .iter()
                .filter(|chunk| chunk.node.role() == RaftRole::Leader)
                .count();
            leaders == 1
        },
    )
    .await;

    // A write submitted through either survivor still commits and shows up
    // on both.
    let id = Id::new();
    survivors[0].insert(row(id, 99)).await.unwrap();
    for chunk in &survivors {
        let chunk = chunk.clone();
        wait_until(
            "post-failover insert to replicate",
            Duration::from_secs(10),
            move || chunk.container().get_by_id(id, LogicalTime::MAX).is_some(),
        )
        .await;
    }

    b.kill();
    c.kill();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn log_locked_transactions_conflict_across_peers() {
    let (a, b, c, chunk_id) = three_replicas().await;
    let id = Id::new();

    let chunk_on_a = raft_chunk(&a, chunk_id);
    let chunk_on_b = raft_chunk(&b, chunk_id);

    let hub_a = a.table().hub().clone();
    let hub_b = b.table().hub().clone();
    let commit_on_a = {
        let chunk = chunk_on_a.clone();
        async move {
            let mut transaction = chunk.new_transaction(hub_a.sample());
            transaction.insert(row(id, 1));
            chunk.commit(&transaction).await
        }
    };
    let commit_on_b = {
        let chunk = chunk_on_b.clone();
        async move {
            let mut transaction = chunk.new_transaction(hub_b.sample());
            transaction.insert(row(id, 2));
            chunk.commit(&transaction).await
        }
    };

    let (result_a, result_b) = tokio::join!(commit_on_a, commit_on_b);
    let successes = [&result_a, &result_b]
        .iter()
        .filter(|result| result.is_ok())
        .count();
    assert_eq!(successes, 1, "the log lock must serialize the two commits");

    a.kill();
    b.kill();
    c.kill();
}
