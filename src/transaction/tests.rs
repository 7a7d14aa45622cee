#[cfg(test)]
mod tests {
    use crate::core::error::MapError;
    use crate::core::id::Id;
    use crate::core::peer::PeerAddr;
    use crate::core::time::{LogicalClock, LogicalTime};
    use crate::hub::service::Hub;
    use crate::net_table::table::{ChunkBackend, NetTable};
    use crate::table::descriptor::TableDescriptor;
    use crate::table::revision::{FieldValue, Revision};

    use std::sync::Arc;

    fn test_table(addr: &str) -> Arc<NetTable> {
        let hub = Hub::new(PeerAddr::new(addr), Arc::new(LogicalClock::new()));
        NetTable::new(
            TableDescriptor::new("counters", 1),
            ChunkBackend::Broadcast,
            hub,
            None,
        )
    }

    fn counter(id: Id, value: i64) -> Revision {
        Revision::new(id, vec![FieldValue::I64(value)])
    }

    // ============================================================
    // CHUNK TRANSACTION BUFFERS
    // ============================================================

    #[tokio::test]
    async fn test_reads_see_uncommitted_buffers_first() {
        let table = test_table("127.0.0.1:9101");
        let chunk = table.new_chunk().await;
        let id = Id::new();

        let mut setup = chunk.new_transaction(table.hub().sample());
        setup.insert(counter(id, 1));
        chunk.commit(&setup).await.unwrap();

        let mut transaction = chunk.new_transaction(table.hub().sample());
        // Committed state visible through the transaction.
        assert_eq!(
            transaction.get_by_id(id).unwrap().value(0),
            Some(&FieldValue::I64(1))
        );
        // A buffered update shadows it.
        let mut updated = (*chunk.container().get_by_id(id, LogicalTime::MAX).unwrap()).clone();
        updated.values = vec![FieldValue::I64(2)];
        transaction.update(updated);
        assert_eq!(
            transaction.get_by_id(id).unwrap().value(0),
            Some(&FieldValue::I64(2))
        );
        // Nothing was applied to the chunk yet.
        assert_eq!(
            chunk.container().get_by_id(id, LogicalTime::MAX).unwrap().value(0),
            Some(&FieldValue::I64(1))
        );
    }

    #[tokio::test]
    async fn test_buffered_remove_hides_row_from_reads() {
        let table = test_table("127.0.0.1:9102");
        let chunk = table.new_chunk().await;
        let id = Id::new();

        let mut setup = chunk.new_transaction(table.hub().sample());
        setup.insert(counter(id, 1));
        chunk.commit(&setup).await.unwrap();

        let mut transaction = chunk.new_transaction(table.hub().sample());
        let current = (*chunk.container().get_by_id(id, LogicalTime::MAX).unwrap()).clone();
        transaction.remove(current);
        assert!(transaction.get_by_id(id).is_none());
    }

    #[tokio::test]
    #[should_panic(expected = "already buffered")]
    async fn test_id_may_appear_in_only_one_buffer() {
        let table = test_table("127.0.0.1:9103");
        let chunk = table.new_chunk().await;
        let id = Id::new();

        let mut transaction = chunk.new_transaction(table.hub().sample());
        transaction.insert(counter(id, 1));
        transaction.update(counter(id, 2));
    }

    #[tokio::test]
    async fn test_advisory_check_matches_locked_check() {
        let table = test_table("127.0.0.1:9104");
        let chunk = table.new_chunk().await;
        let id = Id::new();

        let mut setup = chunk.new_transaction(table.hub().sample());
        setup.insert(counter(id, 1));
        chunk.commit(&setup).await.unwrap();

        let mut duplicate = chunk.new_transaction(table.hub().sample());
        duplicate.insert(counter(id, 9));
        assert!(matches!(
            duplicate.check(),
            Err(MapError::InsertConflict(_))
        ));
    }

    // ============================================================
    // MULTI-CHUNK COMMIT
    // ============================================================

    #[tokio::test]
    async fn test_multi_chunk_commit_is_atomic_in_time() {
        let table = test_table("127.0.0.1:9105");
        let chunk_a = table.new_chunk().await;
        let chunk_b = table.new_chunk().await;
        let row_a = Id::new();
        let row_b = Id::new();

        // Seed: counter 10 in A, counter 0 in B.
        let mut seed = table.new_transaction();
        seed.insert(&chunk_a, counter(row_a, 10));
        seed.insert(&chunk_b, counter(row_b, 0));
        seed.commit().await.unwrap();

        let before = table.hub().sample();

        // Transfer one unit from A to B atomically.
        let mut transfer = table.new_transaction();
        let mut debit = (*chunk_a.container().get_by_id(row_a, before).unwrap()).clone();
        debit.values = vec![FieldValue::I64(9)];
        let mut credit = (*chunk_b.container().get_by_id(row_b, before).unwrap()).clone();
        credit.values = vec![FieldValue::I64(1)];
        transfer.update(debit);
        transfer.update(credit);
        transfer.commit().await.unwrap();

        let after = table.hub().sample();

        // Writes share one commit time: at every probe instant the pair is
        // either (10, 0) or (9, 1).
        for probe in before.0..=after.0 {
            let t = LogicalTime(probe);
            let a = chunk_a.container().get_by_id(row_a, t).unwrap();
            let b = chunk_b.container().get_by_id(row_b, t).unwrap();
            let pair = (a.value(0).cloned(), b.value(0).cloned());
            assert!(
                pair == (Some(FieldValue::I64(10)), Some(FieldValue::I64(0)))
                    || pair == (Some(FieldValue::I64(9)), Some(FieldValue::I64(1))),
                "torn read at {}: {:?}",
                t,
                pair
            );
        }
    }

    #[tokio::test]
    async fn test_failed_check_leaves_no_partial_state() {
        let table = test_table("127.0.0.1:9106");
        let chunk_a = table.new_chunk().await;
        let chunk_b = table.new_chunk().await;
        let row_a = Id::new();
        let row_b = Id::new();

        let mut seed = table.new_transaction();
        seed.insert(&chunk_b, counter(row_b, 5));
        seed.commit().await.unwrap();

        // Insert into A is fine; duplicate insert into B must fail the whole
        // commit.
        let mut doomed = table.new_transaction();
        doomed.insert(&chunk_a, counter(row_a, 1));
        doomed.insert(&chunk_b, counter(row_b, 7));
        let result = doomed.commit().await;
        assert!(matches!(result, Err(MapError::InsertConflict(_))));

        let now = LogicalTime::MAX;
        assert!(
            chunk_a.container().get_by_id(row_a, now).is_none(),
            "aborted commit must not leave writes behind"
        );
        assert_eq!(
            chunk_b.container().get_by_id(row_b, now).unwrap().value(0),
            Some(&FieldValue::I64(5))
        );
    }

    #[tokio::test]
    async fn test_conflicting_transactions_commit_at_most_once() {
        let table = test_table("127.0.0.1:9107");
        let chunk = table.new_chunk().await;
        let id = Id::new();

        let mut first = table.new_transaction();
        let mut second = table.new_transaction();
        first.insert(&chunk, counter(id, 1));
        second.insert(&chunk, counter(id, 2));

        let first_result = first.commit().await;
        let second_result = second.commit().await;
        assert!(first_result.is_ok());
        assert!(matches!(
            second_result,
            Err(MapError::InsertConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_across_chunks() {
        let table = test_table("127.0.0.1:9108");
        let chunk_a = table.new_chunk().await;
        let chunk_b = table.new_chunk().await;
        let in_a = Id::new();
        let in_b = Id::new();

        let mut seed = table.new_transaction();
        seed.insert(&chunk_a, counter(in_a, 1));
        seed.insert(&chunk_b, counter(in_b, 2));
        seed.commit().await.unwrap();

        let transaction = table.new_transaction();
        assert_eq!(
            transaction.get_by_id(in_a).unwrap().value(0),
            Some(&FieldValue::I64(1))
        );
        assert_eq!(
            transaction.get_by_id(in_b).unwrap().value(0),
            Some(&FieldValue::I64(2))
        );
        assert!(transaction.get_by_id(Id::new()).is_none());
    }
}
