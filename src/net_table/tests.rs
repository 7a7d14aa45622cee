#[cfg(test)]
mod tests {
    use crate::core::id::Id;
    use crate::core::peer::PeerAddr;
    use crate::core::time::{LogicalClock, LogicalTime};
    use crate::hub::service::Hub;
    use crate::net_table::table::{ChunkBackend, ChunkHandle, NetTable};
    use crate::table::descriptor::TableDescriptor;
    use crate::table::revision::{FieldValue, Revision};

    use std::sync::Arc;

    fn test_table(addr: &str) -> Arc<NetTable> {
        let hub = Hub::new(PeerAddr::new(addr), Arc::new(LogicalClock::new()));
        NetTable::new(
            TableDescriptor::new("things", 1),
            ChunkBackend::Broadcast,
            hub,
            None,
        )
    }

    fn row(id: Id, name: &str) -> Revision {
        Revision::new(id, vec![FieldValue::Str(name.to_string())])
    }

    #[tokio::test]
    async fn test_chunk_creation_and_lookup() {
        let table = test_table("127.0.0.1:9501");
        assert_eq!(table.chunk_count(), 0);

        let chunk = table.new_chunk().await;
        assert_eq!(table.chunk_count(), 1);
        let found = table.get_chunk(chunk.id()).expect("chunk must be found");
        assert_eq!(found.id(), chunk.id());
        assert!(table.get_chunk(Id::new()).is_none());
    }

    #[tokio::test]
    async fn test_chunk_list_is_ordered_by_id() {
        let table = test_table("127.0.0.1:9502");
        for _ in 0..5 {
            table.new_chunk().await;
        }
        let chunks = table.chunk_list();
        for window in chunks.windows(2) {
            assert!(window[0].id() < window[1].id());
        }
    }

    #[tokio::test]
    async fn test_get_by_id_searches_all_chunks() {
        let table = test_table("127.0.0.1:9503");
        let chunk_a = table.new_chunk().await;
        let chunk_b = table.new_chunk().await;
        let in_a = Id::new();
        let in_b = Id::new();

        let mut transaction = table.new_transaction();
        transaction.insert(&chunk_a, row(in_a, "a"));
        transaction.insert(&chunk_b, row(in_b, "b"));
        transaction.commit().await.unwrap();

        let now = table.hub().sample();
        assert_eq!(
            table.get_by_id(in_a, now).unwrap().value(0),
            Some(&FieldValue::Str("a".into()))
        );
        assert_eq!(
            table.get_by_id(in_b, now).unwrap().value(0),
            Some(&FieldValue::Str("b".into()))
        );
        assert!(table.get_by_id(Id::new(), now).is_none());
    }

    #[tokio::test]
    async fn test_raft_backend_table_creates_raft_chunks() {
        let hub = Hub::new(
            PeerAddr::new("127.0.0.1:9504"),
            Arc::new(LogicalClock::new()),
        );
        let table = NetTable::new(
            TableDescriptor::new("things", 1),
            ChunkBackend::Raft,
            hub,
            None,
        );
        let chunk = table.new_chunk().await;
        assert!(matches!(chunk, ChunkHandle::Raft(_)));
        table.shutdown();
    }

    #[tokio::test]
    async fn test_store_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("things.dump");

        let source = test_table("127.0.0.1:9505");
        let chunk = source.new_chunk().await;
        let ids: Vec<Id> = (0..20).map(|_| Id::new()).collect();
        let mut transaction = source.new_transaction();
        for (index, id) in ids.iter().enumerate() {
            transaction.insert(&chunk, row(*id, &format!("row {}", index)));
        }
        transaction.commit().await.unwrap();

        let store_time = source.hub().sample();
        source.store_to_file(&path, store_time).await.unwrap();

        // A fresh process restores the dump and recreates the chunk under
        // its stored id.
        let restored = test_table("127.0.0.1:9506");
        restored.restore_from_file(&path).await.unwrap();

        assert_eq!(restored.chunk_count(), 1);
        let restored_chunk = restored.get_chunk(chunk.id()).expect("same chunk id");
        assert_eq!(restored_chunk.num_items(LogicalTime::MAX).await, 20);
        for id in &ids {
            let revision = restored.get_by_id(*id, LogicalTime::MAX).unwrap();
            assert_eq!(revision.chunk_id, chunk.id());
        }
    }
}
