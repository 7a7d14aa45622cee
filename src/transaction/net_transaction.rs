use crate::core::error::MapError;
use crate::core::id::Id;
use crate::core::time::LogicalTime;
use crate::net_table::table::{ChunkHandle, NetTable};
use crate::table::revision::{FieldValue, Revision};
use crate::transaction::chunk_transaction::ChunkTransaction;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Multi-chunk transaction: a lazily-built map of per-chunk transactions
/// committed with two-phase locking.
///
/// Chunks are always locked in ascending chunk-id order, the globally
/// agreed order every peer uses, so two multi-chunk commits can never
/// deadlock on each other. No write is applied before every chunk's
/// conflict check has passed, and all writes share one commit time, so a
/// reader at any time sees either all of a transaction or none of it.
pub struct NetTableTransaction {
    start_time: LogicalTime,
    table: Arc<NetTable>,
    transactions: BTreeMap<Id, (ChunkHandle, ChunkTransaction)>,
}

impl NetTableTransaction {
    pub fn new(table: Arc<NetTable>, start_time: LogicalTime) -> Self {
        Self {
            start_time,
            table,
            transactions: BTreeMap::new(),
        }
    }

    pub fn start_time(&self) -> LogicalTime {
        self.start_time
    }

    fn transaction_of(&mut self, chunk: &ChunkHandle) -> &mut ChunkTransaction {
        let start_time = self.start_time;
        let entry = self
            .transactions
            .entry(chunk.id())
            .or_insert_with(|| (chunk.clone(), chunk.new_transaction(start_time)));
        &mut entry.1
    }

    /// Buffers an insert into `chunk`.
    pub fn insert(&mut self, chunk: &ChunkHandle, revision: Revision) {
        self.transaction_of(chunk).insert(revision);
    }

    /// Buffers an update; the target chunk comes from the revision itself.
    pub fn update(&mut self, revision: Revision) {
        let chunk = self
            .table
            .get_chunk(revision.chunk_id)
            .unwrap_or_else(|| panic!("update for unknown chunk {}", revision.chunk_id));
        self.transaction_of(&chunk).update(revision);
    }

    /// Buffers a remove; the target chunk comes from the revision itself.
    pub fn remove(&mut self, revision: Revision) {
        let chunk = self
            .table
            .get_chunk(revision.chunk_id)
            .unwrap_or_else(|| panic!("remove for unknown chunk {}", revision.chunk_id));
        self.transaction_of(&chunk).remove(revision);
    }

    pub fn add_conflict_condition(
        &mut self,
        chunk: &ChunkHandle,
        field: usize,
        exemplar: FieldValue,
    ) {
        self.transaction_of(chunk)
            .add_conflict_condition(field, exemplar);
    }

    /// Reads through every uncommitted buffer first, then the table at the
    /// start time.
    pub fn get_by_id(&self, id: Id) -> Option<Revision> {
        for (_, (_, transaction)) in &self.transactions {
            if let Some(buffered) = transaction.get_from_uncommitted(id) {
                return Some(buffered);
            }
        }
        self.table.get_by_id(id, self.start_time)
    }

    /// Advisory pre-check of every chunk transaction, without locks.
    pub fn check(&self) -> Result<(), MapError> {
        for (_, (_, transaction)) in &self.transactions {
            transaction.check()?;
        }
        Ok(())
    }

    /// Two-phase commit across every touched chunk.
    ///
    /// Lock in ascending chunk-id order, check everything, apply everything
    /// at one sampled commit time, unlock in reverse. On a failed check all
    /// held locks are released and nothing was applied.
    pub async fn commit(&self) -> Result<(), MapError> {
        let ordered: Vec<&(ChunkHandle, ChunkTransaction)> =
            self.transactions.values().collect();

        for (chunk, _) in &ordered {
            chunk.write_lock().await;
        }

        let mut failed = None;
        for (chunk, transaction) in &ordered {
            if let Err(conflict) = chunk.check_locked(transaction).await {
                failed = Some(conflict);
                break;
            }
        }

        if let Some(conflict) = failed {
            for (chunk, _) in ordered.iter().rev() {
                chunk.unlock().await;
            }
            return Err(conflict);
        }

        let commit_time = self.table.hub().sample();
        for (chunk, transaction) in &ordered {
            chunk.commit_locked(transaction, commit_time).await;
        }

        for (chunk, _) in ordered.iter().rev() {
            chunk.unlock().await;
        }
        Ok(())
    }

    pub fn write_count(&self) -> usize {
        self.transactions
            .values()
            .map(|(_, transaction)| transaction.write_count())
            .sum()
    }
}
