#[cfg(test)]
mod tests {
    use crate::core::error::MapError;
    use crate::core::id::Id;
    use crate::core::peer::PeerAddr;
    use crate::core::time::{LogicalClock, LogicalTime};
    use std::sync::Arc;

    // ============================================================
    // LOGICAL CLOCK TESTS
    // ============================================================

    #[test]
    fn test_sample_is_strictly_increasing() {
        let clock = LogicalClock::new();
        let mut previous = clock.sample();
        for _ in 0..1000 {
            let next = clock.sample();
            assert!(next > previous, "{} should exceed {}", next, previous);
            previous = next;
        }
    }

    #[test]
    fn test_merge_raises_past_observed() {
        let clock = LogicalClock::new();
        clock.merge(LogicalTime(100));
        let sampled = clock.sample();
        assert!(
            sampled > LogicalTime(100),
            "sample after merge(100) was {}",
            sampled
        );
    }

    #[test]
    fn test_merge_of_older_time_still_advances() {
        let clock = LogicalClock::new();
        let before = clock.sample();
        clock.merge(LogicalTime(0));
        let after = clock.sample();
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_concurrent_samples_are_unique() {
        let clock = Arc::new(LogicalClock::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let clock = clock.clone();
            handles.push(tokio::spawn(async move {
                (0..500).map(|_| clock.sample()).collect::<Vec<_>>()
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let count = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), count, "duplicate logical times handed out");
    }

    // ============================================================
    // IDENTIFIER TESTS
    // ============================================================

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = Id::new();
        let b = Id::new();
        assert!(a.is_valid());
        assert!(b.is_valid());
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_sentinel() {
        assert!(!Id::invalid().is_valid());
        assert_eq!(Id::default(), Id::invalid());
    }

    #[test]
    fn test_hex_rendering_is_full_width() {
        let id = Id(0xab);
        assert_eq!(id.hex().len(), 32);
        assert!(id.hex().ends_with("ab"));
    }

    // ============================================================
    // PEER ADDRESS TESTS
    // ============================================================

    #[test]
    fn test_peer_addresses_order_lexicographically() {
        let a = PeerAddr::new("127.0.0.1:5000");
        let b = PeerAddr::new("127.0.0.1:5001");
        let c = PeerAddr::new("127.0.0.2:4000");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_rpc_url() {
        let peer = PeerAddr::new("127.0.0.1:5000");
        assert_eq!(peer.rpc_url(), "http://127.0.0.1:5000/rpc");
    }

    // ============================================================
    // ERROR TAXONOMY TESTS
    // ============================================================

    #[test]
    fn test_conflict_classification() {
        assert!(MapError::InsertConflict(Id::new()).is_conflict());
        assert!(MapError::UpdateConflict(Id::new()).is_conflict());
        assert!(MapError::ConditionConflict { field: 0 }.is_conflict());
        assert!(!MapError::NotFound(Id::new()).is_conflict());
        assert!(!MapError::LockDeclined(PeerAddr::new("127.0.0.1:1")).is_conflict());
    }
}
