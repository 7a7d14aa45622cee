use crate::core::id::Id;
use crate::core::time::LogicalTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single typed field value of a row.
///
/// The variants mirror the wire tags of the serialized record; rows are
/// otherwise opaque to the coordination layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldValue {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F64(f64),
    Str(String),
    Blob(Vec<u8>),
    Hash128(Id),
}

/// An immutable version of one row.
///
/// Once a revision has been admitted into a container it is never modified;
/// updates produce a new revision with a larger `update_time`. The
/// `tracking` multimap records cross-chunk references (table name to chunk
/// ids) carried along with the row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revision {
    pub id: Id,
    pub chunk_id: Id,
    pub insert_time: LogicalTime,
    pub update_time: LogicalTime,
    pub removed: bool,
    pub values: Vec<FieldValue>,
    pub tracking: BTreeMap<String, BTreeSet<Id>>,
}

impl Revision {
    /// A fresh revision for a new row. Times are stamped by the container
    /// (insert) or the commit path (transactions) before storage.
    pub fn new(id: Id, values: Vec<FieldValue>) -> Self {
        Self {
            id,
            chunk_id: Id::invalid(),
            insert_time: LogicalTime::default(),
            update_time: LogicalTime::default(),
            removed: false,
            values,
            tracking: BTreeMap::new(),
        }
    }

    /// Derives the successor revision carrying `values`, preserving identity
    /// and insert time. The update time is stamped at commit.
    pub fn updated(&self, values: Vec<FieldValue>) -> Self {
        Self {
            id: self.id,
            chunk_id: self.chunk_id,
            insert_time: self.insert_time,
            update_time: self.update_time,
            removed: false,
            values,
            tracking: self.tracking.clone(),
        }
    }

    /// Derives the tombstone successor of this revision.
    pub fn removal(&self) -> Self {
        let mut next = self.updated(self.values.clone());
        next.removed = true;
        next
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn track(&mut self, table: &str, chunk_id: Id) {
        self.tracking
            .entry(table.to_string())
            .or_default()
            .insert(chunk_id);
    }

    /// Field access for conflict conditions and filtered scans.
    pub fn value(&self, field: usize) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Length-delimited binary record used on the wire and in chunk files.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
