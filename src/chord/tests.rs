#[cfg(test)]
mod tests {
    use crate::chord::index::ChordIndex;
    use crate::chord::types::{is_in, ring_hash, ChordPeer};
    use crate::core::peer::PeerAddr;
    use crate::core::time::LogicalClock;
    use crate::hub::service::Hub;
    use crate::hub::types::RpcPayload;

    use std::sync::Arc;
    use std::time::Duration;

    fn solo_ring(addr: &str) -> Arc<ChordIndex> {
        let hub = Hub::new(PeerAddr::new(addr), Arc::new(LogicalClock::new()));
        let index = ChordIndex::new(hub, Duration::from_millis(10));
        index.create();
        index
    }

    // ============================================================
    // RING INTERVAL MATH
    // ============================================================

    #[test]
    fn test_is_in_plain_interval() {
        assert!(is_in(5, 3, 8));
        assert!(is_in(3, 3, 8), "from bound is inclusive");
        assert!(!is_in(8, 3, 8), "to bound is exclusive");
        assert!(!is_in(2, 3, 8));
        assert!(!is_in(9, 3, 8));
    }

    #[test]
    fn test_is_in_wrapping_interval() {
        // Interval passing zero: (u64::MAX - 10, 5).
        let from = u64::MAX - 10;
        assert!(is_in(u64::MAX, from, 5));
        assert!(is_in(0, from, 5));
        assert!(is_in(4, from, 5));
        assert!(!is_in(5, from, 5));
        assert!(!is_in(from - 1, from, 5));
    }

    #[test]
    fn test_is_in_degenerate_interval_is_full_circle() {
        assert!(is_in(0, 7, 7));
        assert!(is_in(u64::MAX, 7, 7));
        assert!(is_in(7, 7, 7));
    }

    #[test]
    fn test_ring_hash_is_deterministic() {
        let a = ring_hash("127.0.0.1:5000");
        let b = ring_hash("127.0.0.1:5000");
        let c = ring_hash("127.0.0.1:5001");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_chord_peer_caches_its_key() {
        let peer = ChordPeer::new(PeerAddr::new("127.0.0.1:5000"));
        assert_eq!(peer.key, ring_hash("127.0.0.1:5000"));
    }

    // ============================================================
    // SINGLE-NODE RING
    // ============================================================

    #[tokio::test]
    async fn test_created_ring_points_at_itself() {
        let index = solo_ring("127.0.0.1:9301");
        assert_eq!(index.successor(), PeerAddr::new("127.0.0.1:9301"));
        assert_eq!(index.predecessor(), PeerAddr::new("127.0.0.1:9301"));
        index.leave();
    }

    #[tokio::test]
    async fn test_solo_node_is_responsible_for_everything() {
        let index = solo_ring("127.0.0.1:9302");
        for key in ["a", "b", "chunk/0123"] {
            let responsible = index.find_successor(ring_hash(key)).await.unwrap();
            assert_eq!(responsible, PeerAddr::new("127.0.0.1:9302"));
        }
        index.leave();
    }

    #[tokio::test]
    async fn test_add_and_retrieve_data_locally() {
        let index = solo_ring("127.0.0.1:9303");
        index
            .add_data("map/chunk-1".into(), "127.0.0.1:9303".into())
            .await
            .unwrap();

        let value = index.retrieve_data("map/chunk-1".into()).await.unwrap();
        assert_eq!(value.as_deref(), Some("127.0.0.1:9303"));

        let missing = index.retrieve_data("map/other".into()).await.unwrap();
        assert!(missing.is_none());
        assert_eq!(index.local_entry_count(), 1);
        index.leave();
    }

    #[tokio::test]
    async fn test_handlers_answer_after_initialization() {
        let index = solo_ring("127.0.0.1:9304");
        let sender = PeerAddr::new("127.0.0.1:9999");

        let response = index
            .handle_request(sender.clone(), RpcPayload::ChordGetSuccessor)
            .await;
        assert!(matches!(
            response,
            RpcPayload::ChordPeer(peer) if peer == PeerAddr::new("127.0.0.1:9304")
        ));

        let response = index
            .handle_request(
                sender.clone(),
                RpcPayload::ChordAddData {
                    key: "k".into(),
                    value: "v".into(),
                },
            )
            .await;
        assert!(response.is_ack());

        let response = index
            .handle_request(sender, RpcPayload::ChordRetrieveData { key: "k".into() })
            .await;
        assert!(matches!(
            response,
            RpcPayload::ChordData { value: Some(v) } if v == "v"
        ));
        index.leave();
    }

    #[tokio::test]
    async fn test_notify_adopts_closer_predecessor() {
        let index = solo_ring("127.0.0.1:9305");
        let sender = PeerAddr::new("127.0.0.1:9399");

        let response = index
            .handle_request(sender.clone(), RpcPayload::ChordNotify)
            .await;
        assert!(response.is_ack());
        // On a one-node ring any newcomer falls between self and self.
        assert_eq!(index.predecessor(), sender);
        assert_eq!(index.successor(), sender);
        index.leave();
    }
}
