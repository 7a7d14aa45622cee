use crate::core::peer::PeerAddr;
use md5::{Digest, Md5};

/// Position on the ring. Keys are derived from MD5 digests, so the ring has
/// 64 bits of key space and as many finger slots.
pub type RingKey = u64;

pub const RING_BITS: usize = 64;

/// Hashes arbitrary directory data (peer addresses, chunk ids) onto the
/// ring.
pub fn ring_hash(data: &str) -> RingKey {
    let digest = Md5::digest(data.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    RingKey::from_le_bytes(bytes)
}

/// A known ring member: its address and its cached key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordPeer {
    pub addr: PeerAddr,
    pub key: RingKey,
}

impl ChordPeer {
    pub fn new(addr: PeerAddr) -> Self {
        let key = ring_hash(addr.as_str());
        Self { addr, key }
    }
}

/// Ring interval membership test: `key` in `[from, to)` walking the ring
/// forward, with `from == to` denoting the full circle.
pub fn is_in(key: RingKey, from_inclusive: RingKey, to_exclusive: RingKey) -> bool {
    if key == from_inclusive {
        return true;
    }
    if from_inclusive == to_exclusive {
        return true;
    }
    if from_inclusive <= to_exclusive {
        from_inclusive < key && key < to_exclusive
    } else {
        // Interval wraps around zero.
        from_inclusive < key || key < to_exclusive
    }
}
