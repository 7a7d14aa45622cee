#[cfg(test)]
mod tests {
    use crate::core::id::Id;
    use crate::core::peer::PeerAddr;
    use crate::core::time::{LogicalClock, LogicalTime};
    use crate::hub::service::Hub;
    use crate::hub::types::{ChunkRef, Envelope, RpcPayload};
    use crate::table::revision::{FieldValue, Revision};

    use std::sync::Arc;

    fn test_hub(addr: &str) -> Arc<Hub> {
        Hub::new(PeerAddr::new(addr), Arc::new(LogicalClock::new()))
    }

    #[test]
    fn test_wrap_stamps_increasing_times() {
        let hub = test_hub("127.0.0.1:9401");
        let first = hub.wrap(RpcPayload::Ack);
        let second = hub.wrap(RpcPayload::Ack);
        assert_eq!(first.sender, PeerAddr::new("127.0.0.1:9401"));
        assert!(second.logical_time > first.logical_time);
    }

    #[test]
    fn test_envelope_json_roundtrip() {
        let mut revision = Revision::new(
            Id::new(),
            vec![
                FieldValue::Str("payload".into()),
                FieldValue::Blob(vec![1, 2, 3]),
            ],
        );
        revision.chunk_id = Id::new();
        revision.insert_time = LogicalTime(4);
        revision.update_time = LogicalTime(9);

        let envelope = Envelope {
            sender: PeerAddr::new("127.0.0.1:9402"),
            logical_time: LogicalTime(17),
            payload: RpcPayload::ChunkInsert {
                meta: ChunkRef {
                    table: "rows".into(),
                    chunk_id: revision.chunk_id,
                },
                revision: revision.clone(),
            },
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.sender, envelope.sender);
        assert_eq!(decoded.logical_time, envelope.logical_time);
        match decoded.payload {
            RpcPayload::ChunkInsert { meta, revision: r } => {
                assert_eq!(meta.table, "rows");
                assert_eq!(r, revision);
            }
            other => panic!("wrong payload after roundtrip: {:?}", other),
        }
    }

    #[test]
    fn test_ack_and_decline_classification() {
        assert!(RpcPayload::Ack.is_ack());
        assert!(!RpcPayload::Ack.is_decline());
        assert!(RpcPayload::Decline.is_decline());
        assert!(!RpcPayload::Decline.is_ack());
    }

    #[test]
    fn test_left_peers_are_remembered() {
        let hub = test_hub("127.0.0.1:9403");
        let peer = PeerAddr::new("127.0.0.1:9404");
        assert!(!hub.has_left(&peer));
        hub.mark_left(&peer);
        assert!(hub.has_left(&peer));
    }

    #[tokio::test]
    async fn test_request_to_unreachable_peer_fails_with_rpc_error() {
        let hub = test_hub("127.0.0.1:9405");
        // Nothing listens on this port.
        let peer = PeerAddr::new("127.0.0.1:1");
        let result = hub
            .request_with_timeout(
                &peer,
                RpcPayload::Ack,
                std::time::Duration::from_millis(200),
            )
            .await;
        assert!(matches!(
            result,
            Err(crate::core::error::MapError::Rpc { .. })
        ));
    }
}
