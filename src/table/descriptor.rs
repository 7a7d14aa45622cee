use serde::{Deserialize, Serialize};

/// Minimal description of a table: its name and row arity.
///
/// Full schema declaration lives with the application; the coordination
/// layer only needs enough structure to verify that revisions exchanged
/// between peers match the table they claim to belong to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub field_count: usize,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, field_count: usize) -> Self {
        Self {
            name: name.into(),
            field_count,
        }
    }

    /// Structure check applied before buffering a revision into a
    /// transaction.
    pub fn structure_matches(&self, revision: &crate::table::revision::Revision) -> bool {
        revision.values.len() == self.field_count
    }
}
