#[cfg(test)]
mod tests {
    use crate::core::error::MapError;
    use crate::core::id::Id;
    use crate::core::peer::PeerAddr;
    use crate::core::time::{LogicalClock, LogicalTime};
    use crate::hub::service::Hub;
    use crate::hub::types::ChunkRef;
    use crate::raft::chunk::RaftChunk;
    use crate::raft::node::RaftNode;
    use crate::raft::protocol::{AppendEntriesRequest, AppendStatus, VoteRequest, WireEntry};
    use crate::raft::types::EntryPayload;
    use crate::table::descriptor::TableDescriptor;
    use crate::table::revision::{FieldValue, Revision};

    use std::sync::Arc;

    fn test_hub(addr: &str) -> Arc<Hub> {
        Hub::new(PeerAddr::new(addr), Arc::new(LogicalClock::new()))
    }

    fn follower_node(addr: &str) -> Arc<RaftNode> {
        let hub = test_hub(addr);
        let meta = ChunkRef {
            table: "rows".into(),
            chunk_id: Id::new(),
        };
        RaftNode::new(meta, hub, vec![PeerAddr::new("127.0.0.1:9990")])
    }

    fn wire_entry(term: u64, serial_id: u64) -> WireEntry {
        WireEntry {
            term,
            sender: PeerAddr::new("127.0.0.1:9990"),
            serial_id,
            payload: EntryPayload::Noop,
        }
    }

    fn append_request(
        term: u64,
        commit_index: u64,
        previous: (u64, u64),
        entry: WireEntry,
        last: (u64, u64),
    ) -> AppendEntriesRequest {
        AppendEntriesRequest {
            term,
            commit_index,
            last_log_index: last.0,
            last_log_term: last.1,
            previous_log_index: Some(previous.0),
            previous_log_term: Some(previous.1),
            entry: Some(entry),
        }
    }

    fn leader() -> PeerAddr {
        PeerAddr::new("127.0.0.1:9990")
    }

    fn row(id: Id, value: i64) -> Revision {
        Revision::new(id, vec![FieldValue::I64(value)])
    }

    // ============================================================
    // VOTING
    // ============================================================

    #[tokio::test]
    async fn test_vote_granted_once_per_term() {
        let node = follower_node("127.0.0.1:9201");
        let request = VoteRequest {
            term: 1,
            last_log_index: 0,
            last_log_term: 0,
            commit_index: 0,
        };

        let first = node.handle_request_vote(PeerAddr::new("127.0.0.1:9991"), request.clone());
        assert!(first.granted);

        // A second candidate in the same term cannot also be granted; this
        // is what makes two leaders per term impossible.
        let second = node.handle_request_vote(PeerAddr::new("127.0.0.1:9992"), request);
        assert!(!second.granted);
    }

    #[tokio::test]
    async fn test_vote_rejects_stale_log() {
        let node = follower_node("127.0.0.1:9202");
        // Grow the local log to (1, term 2) through an append.
        let response = node.handle_append_entries(
            leader(),
            append_request(2, 0, (0, 0), wire_entry(2, 1), (1, 2)),
        );
        assert_eq!(response.status, AppendStatus::Success);

        // Candidate with an older log term is refused even with a newer
        // term number.
        let stale = VoteRequest {
            term: 5,
            last_log_index: 3,
            last_log_term: 1,
            commit_index: 0,
        };
        let response = node.handle_request_vote(PeerAddr::new("127.0.0.1:9993"), stale);
        assert!(!response.granted);

        // Same last term, shorter log: also refused.
        let shorter = VoteRequest {
            term: 6,
            last_log_index: 0,
            last_log_term: 2,
            commit_index: 0,
        };
        let response = node.handle_request_vote(PeerAddr::new("127.0.0.1:9993"), shorter);
        assert!(!response.granted);
    }

    // ============================================================
    // LOG MATCHING
    // ============================================================

    #[tokio::test]
    async fn test_append_matches_previous_coordinates() {
        let node = follower_node("127.0.0.1:9203");

        let ok = node.handle_append_entries(
            leader(),
            append_request(1, 0, (0, 0), wire_entry(1, 1), (1, 1)),
        );
        assert_eq!(ok.status, AppendStatus::Success);
        assert_eq!(ok.last_log_index, 1);

        // An entry whose previous coordinates are ahead of our log fails,
        // prompting the leader to rewind.
        let gap = node.handle_append_entries(
            leader(),
            append_request(1, 0, (5, 1), wire_entry(1, 9), (6, 1)),
        );
        assert_eq!(gap.status, AppendStatus::Failed);
        assert_eq!(gap.last_log_index, 1);
    }

    #[tokio::test]
    async fn test_duplicate_entry_reports_already_present() {
        let node = follower_node("127.0.0.1:9204");
        for serial in 1..=2 {
            let response = node.handle_append_entries(
                leader(),
                append_request(1, 0, (serial - 1, if serial == 1 { 0 } else { 1 }),
                    wire_entry(1, serial), (serial, 1)),
            );
            assert_eq!(response.status, AppendStatus::Success);
        }

        // Resend of entry 2 (previous = entry 1).
        let duplicate = node.handle_append_entries(
            leader(),
            append_request(1, 0, (1, 1), wire_entry(1, 2), (2, 1)),
        );
        assert_eq!(duplicate.status, AppendStatus::AlreadyPresent);
        assert_eq!(duplicate.last_log_index, 2);
    }

    #[tokio::test]
    async fn test_uncommitted_conflict_is_truncated() {
        let node = follower_node("127.0.0.1:9205");
        for serial in 1..=2 {
            let response = node.handle_append_entries(
                leader(),
                append_request(1, 0, (serial - 1, if serial == 1 { 0 } else { 1 }),
                    wire_entry(1, serial), (serial, 1)),
            );
            assert_eq!(response.status, AppendStatus::Success);
        }

        // A new leader replaces the uncommitted entry 2.
        let new_leader = PeerAddr::new("127.0.0.1:9995");
        let replacement = node.handle_append_entries(
            new_leader,
            append_request(3, 0, (1, 1), wire_entry(3, 77), (2, 3)),
        );
        assert_eq!(replacement.status, AppendStatus::Success);
        assert_eq!(replacement.last_log_index, 2);
        assert_eq!(replacement.last_log_term, 3);
    }

    #[tokio::test]
    #[should_panic(expected = "truncate committed entry")]
    async fn test_committed_entry_cannot_be_truncated() {
        let node = follower_node("127.0.0.1:9206");
        for serial in 1..=2 {
            let response = node.handle_append_entries(
                leader(),
                // commit_index 1 commits entry 1 as soon as entry 2 lands.
                append_request(1, 1, (serial - 1, if serial == 1 { 0 } else { 1 }),
                    wire_entry(1, serial), (serial, 1)),
            );
            assert_eq!(response.status, AppendStatus::Success);
        }
        // Commit entry 2 via a heartbeat.
        let heartbeat = AppendEntriesRequest {
            term: 1,
            commit_index: 2,
            last_log_index: 2,
            last_log_term: 1,
            previous_log_index: None,
            previous_log_term: None,
            entry: None,
        };
        let response = node.handle_append_entries(leader(), heartbeat);
        assert_eq!(response.commit_index, 2);

        // Any rewind over the committed entry must abort the process.
        let new_leader = PeerAddr::new("127.0.0.1:9995");
        node.handle_append_entries(
            new_leader,
            append_request(3, 0, (1, 1), wire_entry(3, 88), (2, 3)),
        );
    }

    #[tokio::test]
    #[should_panic(expected = "two leaders in term")]
    async fn test_second_leader_in_same_term_is_fatal() {
        let node = follower_node("127.0.0.1:9207");
        let heartbeat = |sender: PeerAddr| {
            (
                sender,
                AppendEntriesRequest {
                    term: 4,
                    commit_index: 0,
                    last_log_index: 0,
                    last_log_term: 0,
                    previous_log_index: None,
                    previous_log_term: None,
                    entry: None,
                },
            )
        };
        let (first, request) = heartbeat(PeerAddr::new("127.0.0.1:9990"));
        node.handle_append_entries(first, request);
        let (second, request) = heartbeat(PeerAddr::new("127.0.0.1:9991"));
        node.handle_append_entries(second, request);
    }

    // ============================================================
    // SINGLE-NODE CHUNK (log-backed commit path)
    // ============================================================

    fn solo_raft_chunk(addr: &str) -> (Arc<Hub>, Arc<RaftChunk>) {
        let hub = test_hub(addr);
        let chunk = RaftChunk::initialize_new(
            Id::new(),
            Arc::new(TableDescriptor::new("rows", 1)),
            hub.clone(),
        );
        (hub, chunk)
    }

    #[tokio::test]
    async fn test_insert_goes_through_the_log() {
        let (hub, chunk) = solo_raft_chunk("127.0.0.1:9208");
        let id = Id::new();

        chunk.insert(row(id, 7)).await.unwrap();

        let stored = chunk
            .container()
            .get_by_id(id, LogicalTime::MAX)
            .expect("committed entry must be applied");
        assert_eq!(stored.value(0), Some(&FieldValue::I64(7)));
        assert_eq!(stored.chunk_id, chunk.id());
        assert!(hub.clock.current() > LogicalTime(0));
        chunk.node.stop();
    }

    #[tokio::test]
    async fn test_lock_entry_makes_holder() {
        let (hub, chunk) = solo_raft_chunk("127.0.0.1:9209");

        chunk.write_lock().await;
        let lock = chunk.node.lock_state();
        assert_eq!(lock.holder.as_ref(), Some(hub.local()));
        assert!(lock.lock_index > 0);

        chunk.unlock().await;
        assert!(chunk.node.lock_state().holder.is_none());
        chunk.node.stop();
    }

    #[tokio::test]
    async fn test_transaction_commit_and_conflict() {
        let (hub, chunk) = solo_raft_chunk("127.0.0.1:9210");
        let id = Id::new();

        let mut first = chunk.new_transaction(hub.sample());
        first.insert(row(id, 1));
        chunk.commit(&first).await.unwrap();

        let mut duplicate = chunk.new_transaction(hub.sample());
        duplicate.insert(row(id, 2));
        let result = chunk.commit(&duplicate).await;
        assert!(matches!(result, Err(MapError::InsertConflict(_))));

        let mut update = chunk.new_transaction(hub.sample());
        let mut next = (*chunk.container().get_by_id(id, LogicalTime::MAX).unwrap()).clone();
        next.values = vec![FieldValue::I64(2)];
        update.update(next);
        chunk.commit(&update).await.unwrap();

        assert_eq!(
            chunk
                .container()
                .get_by_id(id, LogicalTime::MAX)
                .unwrap()
                .value(0),
            Some(&FieldValue::I64(2))
        );
        chunk.node.stop();
    }

    #[tokio::test]
    async fn test_duplicate_serial_is_deduplicated() {
        let (hub, chunk) = solo_raft_chunk("127.0.0.1:9211");
        let _ = hub;

        let first = chunk
            .node
            .append_as_leader(EntryPayload::Noop, leader(), 41, false);
        let retried = chunk
            .node
            .append_as_leader(EntryPayload::Noop, leader(), 41, true);
        assert_eq!(first, retried, "a retried serial must not append twice");

        let fresh = chunk
            .node
            .append_as_leader(EntryPayload::Noop, leader(), 42, false);
        assert_eq!(fresh, first + 1);
        chunk.node.stop();
    }
}
