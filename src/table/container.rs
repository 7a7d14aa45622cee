use crate::core::error::MapError;
use crate::core::id::Id;
use crate::core::time::LogicalTime;
use crate::table::revision::{FieldValue, Revision};

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Selector for set-returning queries.
///
/// `Alive` matches every row whose latest revision at the query time is not
/// removed; `Field` additionally requires one field to equal an exemplar
/// value.
#[derive(Debug, Clone)]
pub enum RowFilter {
    Alive,
    Field { field: usize, exemplar: FieldValue },
}

impl RowFilter {
    fn matches(&self, revision: &Revision) -> bool {
        if revision.is_removed() {
            return false;
        }
        match self {
            RowFilter::Alive => true,
            RowFilter::Field { field, exemplar } => revision.value(*field) == Some(exemplar),
        }
    }
}

/// Per-chunk history map: id to revisions ordered by descending update time.
///
/// Invariants: every history is non-empty, the first element is the latest,
/// update times strictly decrease along the list, and the earliest revision
/// is the insert (`insert_time == update_time`). Mutation happens only under
/// the chunk's distributed lock or inside the Raft apply path; reads are
/// lock-free.
pub struct RowContainer {
    rows: DashMap<Id, Vec<Arc<Revision>>>,
}

impl RowContainer {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// Admits a brand-new row. Fails if the id is already present.
    pub fn insert(&self, time: LogicalTime, mut revision: Revision) -> Result<(), MapError> {
        revision.insert_time = time;
        revision.update_time = time;
        match self.rows.entry(revision.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(MapError::InsertConflict(revision.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(vec![Arc::new(revision)]);
                Ok(())
            }
        }
    }

    /// Prepends a new revision to an existing history.
    ///
    /// Fails if the id is absent or `time` does not advance past the current
    /// latest update.
    pub fn update(&self, time: LogicalTime, mut revision: Revision) -> Result<(), MapError> {
        let mut history = self
            .rows
            .get_mut(&revision.id)
            .ok_or(MapError::NotFound(revision.id))?;
        let latest = history
            .first()
            .unwrap_or_else(|| panic!("empty history for id {}", revision.id));
        if time <= latest.update_time {
            return Err(MapError::UpdateConflict(revision.id));
        }
        // The original insert time travels with the whole history.
        revision.insert_time = history
            .last()
            .map(|first| first.insert_time)
            .unwrap_or(time);
        revision.update_time = time;
        history.insert(0, Arc::new(revision));
        Ok(())
    }

    /// Idempotent admission of a remote revision into sorted position.
    ///
    /// Returns true if the revision was new. A revision whose update time is
    /// already present in the history is dropped, which makes duplicate
    /// broadcasts and replays harmless.
    pub fn patch(&self, revision: Revision) -> bool {
        let mut history = self.rows.entry(revision.id).or_default();
        let position = history
            .iter()
            .position(|stored| stored.update_time <= revision.update_time);
        match position {
            Some(at) => {
                if history[at].update_time == revision.update_time {
                    return false;
                }
                history.insert(at, Arc::new(revision));
            }
            None => history.push(Arc::new(revision)),
        }
        true
    }

    /// The revision a reader at `time` observes, or none.
    pub fn get_by_id(&self, id: Id, time: LogicalTime) -> Option<Arc<Revision>> {
        let history = self.rows.get(&id)?;
        history
            .iter()
            .find(|revision| revision.update_time <= time)
            .cloned()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.rows.contains_key(&id)
    }

    /// Update time of the current head of a history, if any. Used by the
    /// commit conflict check.
    pub fn latest_update_time(&self, id: Id) -> Option<LogicalTime> {
        self.rows.get(&id).map(|history| history[0].update_time)
    }

    /// All rows whose revision at `time` matches `filter`. Result content is
    /// a pure function of state and query; iteration order carries no
    /// promise.
    pub fn find_by(&self, filter: &RowFilter, time: LogicalTime) -> Vec<Arc<Revision>> {
        self.rows
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .iter()
                    .find(|revision| revision.update_time <= time)
                    .filter(|revision| filter.matches(revision))
                    .cloned()
            })
            .collect()
    }

    pub fn count(&self, filter: &RowFilter, time: LogicalTime) -> usize {
        self.find_by(filter, time).len()
    }

    /// Ids of all rows alive at `time`.
    pub fn available_ids(&self, time: LogicalTime) -> Vec<Id> {
        self.find_by(&RowFilter::Alive, time)
            .into_iter()
            .map(|revision| revision.id)
            .collect()
    }

    /// Every revision of one row visible at `time`, newest first.
    pub fn item_history(&self, id: Id, time: LogicalTime) -> Vec<Arc<Revision>> {
        self.rows
            .get(&id)
            .map(|history| {
                history
                    .iter()
                    .filter(|revision| revision.update_time <= time)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Visible histories of all rows belonging to `chunk_id` at `time`.
    pub fn chunk_history(
        &self,
        chunk_id: Id,
        time: LogicalTime,
    ) -> BTreeMap<Id, Vec<Arc<Revision>>> {
        self.rows
            .iter()
            .filter_map(|entry| {
                let visible: Vec<Arc<Revision>> = entry
                    .value()
                    .iter()
                    .filter(|revision| {
                        revision.update_time <= time && revision.chunk_id == chunk_id
                    })
                    .cloned()
                    .collect();
                if visible.is_empty() {
                    None
                } else {
                    Some((*entry.key(), visible))
                }
            })
            .collect()
    }

    /// Latest revision per id at `time`, tombstones included. This is the
    /// payload compared across peers after a join.
    pub fn dump(&self, time: LogicalTime) -> BTreeMap<Id, Arc<Revision>> {
        self.rows
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .iter()
                    .find(|revision| revision.update_time <= time)
                    .cloned()
                    .map(|revision| (*entry.key(), revision))
            })
            .collect()
    }

    /// Complete histories flattened oldest-first, for shipping to a joining
    /// peer. Patching these in order reproduces the container.
    pub fn all_revisions(&self) -> Vec<Revision> {
        let mut out = Vec::new();
        for entry in self.rows.iter() {
            for revision in entry.value().iter().rev() {
                out.push((**revision).clone());
            }
        }
        out
    }

    /// Number of distinct ids ever inserted (tombstones included).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for RowContainer {
    fn default() -> Self {
        Self::new()
    }
}
