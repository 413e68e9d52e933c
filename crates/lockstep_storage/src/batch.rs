//! Write batches submitted to [`crate::PersistenceAdapter::atomic_write`].

/// Operation applied to a single row record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOp {
    /// Insert or overwrite the row with an encoded record.
    Put(Vec<u8>),
    /// Remove the row.
    Delete,
}

/// A row-level entry of a write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowWrite {
    /// Table the row belongs to.
    pub table: u32,
    /// Row identifier.
    pub row_id: u64,
    /// What to do with the row.
    pub op: RowOp,
}

/// Operation applied to a single index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    /// Add `row_id` under `key`.
    Add {
        /// Encoded index key.
        key: Vec<u8>,
    },
    /// Remove `row_id` from under `key`.
    Remove {
        /// Encoded index key.
        key: Vec<u8>,
    },
    /// Move `row_id` from one key to another.
    Relocate {
        /// Key the row is currently stored under.
        from: Vec<u8>,
        /// Key the row must be stored under afterwards.
        to: Vec<u8>,
    },
}

/// An index-level entry of a write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWrite {
    /// Table the index belongs to.
    pub table: u32,
    /// Index name, unique within the table.
    pub index: String,
    /// Row the entry points at.
    pub row_id: u64,
    /// What to do with the entry.
    pub op: IndexOp,
}

/// A combined row diff and index diff, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    rows: Vec<RowWrite>,
    indexes: Vec<IndexWrite>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a row put.
    pub fn put_row(&mut self, table: u32, row_id: u64, record: Vec<u8>) {
        self.rows.push(RowWrite {
            table,
            row_id,
            op: RowOp::Put(record),
        });
    }

    /// Stages a row delete.
    pub fn delete_row(&mut self, table: u32, row_id: u64) {
        self.rows.push(RowWrite {
            table,
            row_id,
            op: RowOp::Delete,
        });
    }

    /// Stages an index entry addition.
    pub fn add_index_entry(&mut self, table: u32, index: impl Into<String>, key: Vec<u8>, row_id: u64) {
        self.push_index(table, index, row_id, IndexOp::Add { key });
    }

    /// Stages an index entry removal.
    pub fn remove_index_entry(
        &mut self,
        table: u32,
        index: impl Into<String>,
        key: Vec<u8>,
        row_id: u64,
    ) {
        self.push_index(table, index, row_id, IndexOp::Remove { key });
    }

    /// Stages moving an index entry from one key to another.
    pub fn relocate_index_entry(
        &mut self,
        table: u32,
        index: impl Into<String>,
        from: Vec<u8>,
        to: Vec<u8>,
        row_id: u64,
    ) {
        self.push_index(table, index, row_id, IndexOp::Relocate { from, to });
    }

    fn push_index(&mut self, table: u32, index: impl Into<String>, row_id: u64, op: IndexOp) {
        self.indexes.push(IndexWrite {
            table,
            index: index.into(),
            row_id,
            op,
        });
    }

    /// Returns the row entries in submission order.
    #[must_use]
    pub fn rows(&self) -> &[RowWrite] {
        &self.rows
    }

    /// Returns the index entries in submission order.
    #[must_use]
    pub fn indexes(&self) -> &[IndexWrite] {
        &self.indexes
    }

    /// Returns true if the batch contains no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.indexes.is_empty()
    }

    /// Returns the distinct tables touched by the batch, ascending.
    #[must_use]
    pub fn tables(&self) -> Vec<u32> {
        let mut tables: Vec<u32> = self
            .rows
            .iter()
            .map(|w| w.table)
            .chain(self.indexes.iter().map(|w| w.table))
            .collect();
        tables.sort_unstable();
        tables.dedup();
        tables
    }
}
