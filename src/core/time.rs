use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A point on the process-local logical timeline.
///
/// Logical times are consistent within any causal chain: every message
/// carries the sender's current time and every receive merges it, so an
/// event that causally follows another always observes a larger value.
/// Unrelated events on peers that never exchanged messages may compare
/// arbitrarily.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct LogicalTime(pub u64);

impl LogicalTime {
    /// Later than any time a clock will ever produce; reads at `MAX` observe
    /// the full current state.
    pub const MAX: LogicalTime = LogicalTime(u64::MAX);
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Process-wide monotonic counter behind all [`LogicalTime`] values.
///
/// `sample()` returns a value strictly greater than every value previously
/// produced in this process and every value ever observed through `merge()`.
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Reads and increments the counter.
    pub fn sample(&self) -> LogicalTime {
        LogicalTime(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Raises the counter to `max(self, observed) + 1`.
    ///
    /// Called for every inbound message with the sender's attached time.
    pub fn merge(&self, observed: LogicalTime) {
        let mut current = self.counter.load(Ordering::SeqCst);
        loop {
            let target = current.max(observed.0) + 1;
            match self.counter.compare_exchange_weak(
                current,
                target,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// The last value handed out, without advancing the clock.
    pub fn current(&self) -> LogicalTime {
        LogicalTime(self.counter.load(Ordering::SeqCst))
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}
