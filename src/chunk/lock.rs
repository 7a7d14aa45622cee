use crate::core::peer::PeerAddr;
use std::pin::pin;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Local view of the distributed reader/writer lock of one chunk.
///
/// The distributed protocol lives in [`crate::chunk::chunk::Chunk`]; this
/// type only tracks what this peer currently believes and lets tasks wait
/// for state changes. `WriteLocked` is a belief, not a fact: the lock is
/// only truly write-locked once every peer agrees, which is exactly what the
/// acquisition round establishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    ReadLocked { readers: usize },
    /// A local write attempt is collecting ACKs from the swarm.
    Attempting,
    /// `holder` (possibly a remote peer) has the write lock. `depth` counts
    /// reentrant acquisitions and is only meaningful for the local holder.
    WriteLocked { holder: PeerAddr, depth: usize },
}

pub struct ChunkLock {
    state: Mutex<LockState>,
    changed: Notify,
}

impl ChunkLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::Unlocked),
            changed: Notify::new(),
        }
    }

    pub fn new_held_by(holder: PeerAddr) -> Self {
        Self {
            state: Mutex::new(LockState::WriteLocked { holder, depth: 0 }),
            changed: Notify::new(),
        }
    }

    /// Runs `step` under the state mutex; on `None` waits for the next state
    /// change and tries again. Successful steps wake all other waiters.
    pub async fn wait_map<T>(&self, mut step: impl FnMut(&mut LockState) -> Option<T>) -> T {
        loop {
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(out) = step(&mut *state) {
                    drop(state);
                    self.changed.notify_waiters();
                    return out;
                }
            }
            notified.await;
        }
    }

    /// Single atomic state transition, waking waiters.
    pub fn mutate<T>(&self, transition: impl FnOnce(&mut LockState) -> T) -> T {
        let out = transition(&mut *self.state.lock().unwrap());
        self.changed.notify_waiters();
        out
    }

    pub fn read<T>(&self, inspect: impl FnOnce(&LockState) -> T) -> T {
        inspect(&*self.state.lock().unwrap())
    }

    /// Whether `peer` is the current write-lock holder, from the local view.
    pub fn is_writer(&self, peer: &PeerAddr) -> bool {
        self.read(|state| matches!(state, LockState::WriteLocked { holder, .. } if holder == peer))
    }

    pub fn snapshot(&self) -> LockState {
        self.read(|state| state.clone())
    }
}

impl Default for ChunkLock {
    fn default() -> Self {
        Self::new()
    }
}
