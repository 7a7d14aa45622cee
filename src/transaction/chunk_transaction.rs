use crate::core::error::MapError;
use crate::core::id::Id;
use crate::core::time::LogicalTime;
use crate::table::container::{RowContainer, RowFilter};
use crate::table::descriptor::TableDescriptor;
use crate::table::revision::{FieldValue, Revision};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Predicate asserted to match zero rows at commit time.
#[derive(Debug, Clone)]
pub struct ConflictCondition {
    pub field: usize,
    pub exemplar: FieldValue,
}

/// Uncommitted write buffer for a single chunk.
///
/// Each id appears in at most one of the three buffers. The advisory
/// [`check`](Self::check) runs without any lock; the authoritative check is
/// the same code invoked by the chunk while it holds the distributed write
/// lock.
pub struct ChunkTransaction {
    start_time: LogicalTime,
    chunk_id: Id,
    descriptor: Arc<TableDescriptor>,
    container: Arc<RowContainer>,
    insertions: BTreeMap<Id, Revision>,
    updates: BTreeMap<Id, Revision>,
    removes: BTreeMap<Id, Revision>,
    conflict_conditions: Vec<ConflictCondition>,
}

impl ChunkTransaction {
    pub fn new(
        start_time: LogicalTime,
        chunk_id: Id,
        descriptor: Arc<TableDescriptor>,
        container: Arc<RowContainer>,
    ) -> Self {
        Self {
            start_time,
            chunk_id,
            descriptor,
            container,
            insertions: BTreeMap::new(),
            updates: BTreeMap::new(),
            removes: BTreeMap::new(),
            conflict_conditions: Vec::new(),
        }
    }

    pub fn start_time(&self) -> LogicalTime {
        self.start_time
    }

    pub fn chunk_id(&self) -> Id {
        self.chunk_id
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
            && self.updates.is_empty()
            && self.removes.is_empty()
            && self.conflict_conditions.is_empty()
    }

    /// Buffers a new row.
    pub fn insert(&mut self, revision: Revision) {
        assert!(
            self.descriptor.structure_matches(&revision),
            "revision structure does not match table {}",
            self.descriptor.name
        );
        let id = revision.id;
        assert!(id.is_valid(), "insert with invalid id");
        assert!(
            !self.touches(id),
            "id {} already buffered in this transaction",
            id
        );
        self.insertions.insert(id, revision);
    }

    /// Buffers a new version of an existing row.
    pub fn update(&mut self, revision: Revision) {
        assert!(
            self.descriptor.structure_matches(&revision),
            "revision structure does not match table {}",
            self.descriptor.name
        );
        let id = revision.id;
        assert!(
            !self.touches(id),
            "id {} already buffered in this transaction",
            id
        );
        self.updates.insert(id, revision);
    }

    /// Buffers a tombstone for an existing row.
    pub fn remove(&mut self, revision: Revision) {
        let id = revision.id;
        assert!(
            !self.touches(id),
            "id {} already buffered in this transaction",
            id
        );
        self.removes.insert(id, revision.removal());
    }

    pub fn add_conflict_condition(&mut self, field: usize, exemplar: FieldValue) {
        self.conflict_conditions
            .push(ConflictCondition { field, exemplar });
    }

    fn touches(&self, id: Id) -> bool {
        self.insertions.contains_key(&id)
            || self.updates.contains_key(&id)
            || self.removes.contains_key(&id)
    }

    /// Read through the transaction: uncommitted buffers first, then the
    /// chunk at the start time. A buffered remove hides the row.
    pub fn get_by_id(&self, id: Id) -> Option<Revision> {
        if let Some(buffered) = self.get_from_uncommitted(id) {
            return Some(buffered);
        }
        if self.removes.contains_key(&id) {
            return None;
        }
        self.container
            .get_by_id(id, self.start_time)
            .filter(|revision| !revision.is_removed())
            .map(|revision| (*revision).clone())
    }

    /// Only the uncommitted buffers, for the multi-chunk read path.
    pub fn get_from_uncommitted(&self, id: Id) -> Option<Revision> {
        if let Some(updated) = self.updates.get(&id) {
            return Some(updated.clone());
        }
        self.insertions.get(&id).cloned()
    }

    /// Advisory conflict check against the chunk's current state, without
    /// taking any lock.
    pub fn check(&self) -> Result<(), MapError> {
        self.check_against(&self.container)
    }

    /// The conflict rules, shared between the advisory check and the
    /// authoritative one the chunk runs under its write lock.
    pub fn check_against(&self, container: &RowContainer) -> Result<(), MapError> {
        for id in self.insertions.keys() {
            if container.contains(*id) {
                tracing::warn!(
                    "Table {} chunk {} already contains id {}",
                    self.descriptor.name,
                    self.chunk_id,
                    id
                );
                return Err(MapError::InsertConflict(*id));
            }
        }
        for id in self.updates.keys().chain(self.removes.keys()) {
            match container.latest_update_time(*id) {
                None => return Err(MapError::NotFound(*id)),
                Some(updated_at) if updated_at >= self.start_time => {
                    return Err(MapError::UpdateConflict(*id));
                }
                Some(_) => {}
            }
        }
        for condition in &self.conflict_conditions {
            let filter = RowFilter::Field {
                field: condition.field,
                exemplar: condition.exemplar.clone(),
            };
            if container.count(&filter, LogicalTime::MAX) > 0 {
                return Err(MapError::ConditionConflict {
                    field: condition.field,
                });
            }
        }
        Ok(())
    }

    /// Buffered inserts in id order, cloned for application.
    pub fn insertions(&self) -> Vec<Revision> {
        self.insertions.values().cloned().collect()
    }

    /// Buffered updates and removes in id order, cloned for application.
    pub fn mutations(&self) -> Vec<Revision> {
        self.updates
            .values()
            .chain(self.removes.values())
            .cloned()
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.insertions.len() + self.updates.len() + self.removes.len()
    }
}
