//! In-memory persistence adapter for testing.

use crate::adapter::PersistenceAdapter;
use crate::batch::{IndexOp, RowOp, WriteBatch};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

type IndexEntries = BTreeMap<Vec<u8>, BTreeSet<u64>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TableData {
    rows: BTreeMap<u64, Vec<u8>>,
    indexes: BTreeMap<String, IndexEntries>,
}

/// A point-in-time copy of everything an [`InMemoryAdapter`] stores.
///
/// Two snapshots compare equal iff every row record and every index entry
/// is byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    tables: BTreeMap<u32, TableData>,
}

impl MemorySnapshot {
    /// Returns the `(row_id, record)` pairs of a table, ordered by row id.
    #[must_use]
    pub fn rows(&self, table: u32) -> Vec<(u64, Vec<u8>)> {
        self.tables
            .get(&table)
            .map(|t| t.rows.iter().map(|(id, r)| (*id, r.clone())).collect())
            .unwrap_or_default()
    }

    /// Returns the number of rows stored in a table.
    #[must_use]
    pub fn row_count(&self, table: u32) -> usize {
        self.tables.get(&table).map_or(0, |t| t.rows.len())
    }

    /// Returns the number of entries stored in a table's index.
    #[must_use]
    pub fn index_len(&self, table: u32, index: &str) -> usize {
        self.tables
            .get(&table)
            .and_then(|t| t.indexes.get(index))
            .map_or(0, |entries| entries.values().map(BTreeSet::len).sum())
    }
}

/// An in-memory persistence adapter.
///
/// This adapter keeps all records in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// Batches are staged against a copy of the touched tables and swapped in
/// only if every entry applies cleanly, so a rejected batch leaves no trace.
///
/// # Fault Injection
///
/// [`InMemoryAdapter::fail_next_writes`] makes the next `n` calls to
/// `atomic_write` fail with [`StorageError::Rejected`] without touching the
/// store. This is how rollback paths are exercised in tests.
///
/// # Example
///
/// ```rust
/// use lockstep_storage::{InMemoryAdapter, PersistenceAdapter, WriteBatch};
///
/// let adapter = InMemoryAdapter::new();
/// adapter.fail_next_writes(1);
///
/// let mut batch = WriteBatch::new();
/// batch.put_row(1, 1, vec![0xAB]);
/// assert!(adapter.atomic_write(&batch).is_err());
/// assert!(adapter.get(1, 1).unwrap().is_none());
///
/// adapter.atomic_write(&batch).unwrap();
/// assert_eq!(adapter.get(1, 1).unwrap(), Some(vec![0xAB]));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    tables: RwLock<BTreeMap<u32, TableData>>,
    max_row_id: AtomicU64,
    fail_next: AtomicUsize,
    writes: AtomicU64,
}

impl InMemoryAdapter {
    /// Creates a new empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `atomic_write` fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Returns the number of batches applied successfully.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns a copy of the whole store.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            tables: self.tables.read().clone(),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn apply(staged: &mut BTreeMap<u32, TableData>, batch: &WriteBatch) -> StorageResult<()> {
    for write in batch.rows() {
        let table = staged.entry(write.table).or_default();
        match &write.op {
            RowOp::Put(record) => {
                table.rows.insert(write.row_id, record.clone());
            }
            RowOp::Delete => {
                if table.rows.remove(&write.row_id).is_none() {
                    return Err(StorageError::MissingRow {
                        table: write.table,
                        row_id: write.row_id,
                    });
                }
            }
        }
    }

    for write in batch.indexes() {
        let entries = staged
            .entry(write.table)
            .or_default()
            .indexes
            .entry(write.index.clone())
            .or_default();
        let missing = || StorageError::MissingIndexEntry {
            table: write.table,
            index: write.index.clone(),
            row_id: write.row_id,
        };
        match &write.op {
            IndexOp::Add { key } => {
                entries.entry(key.clone()).or_default().insert(write.row_id);
            }
            IndexOp::Remove { key } => {
                if !remove_entry(entries, key, write.row_id) {
                    return Err(missing());
                }
            }
            IndexOp::Relocate { from, to } => {
                if !remove_entry(entries, from, write.row_id) {
                    return Err(missing());
                }
                entries.entry(to.clone()).or_default().insert(write.row_id);
            }
        }
    }
    Ok(())
}

fn remove_entry(entries: &mut IndexEntries, key: &[u8], row_id: u64) -> bool {
    let Some(set) = entries.get_mut(key) else {
        return false;
    };
    let removed = set.remove(&row_id);
    if set.is_empty() {
        entries.remove(key);
    }
    removed
}

impl PersistenceAdapter for InMemoryAdapter {
    fn atomic_write(&self, batch: &WriteBatch) -> StorageResult<()> {
        if self.take_injected_failure() {
            return Err(StorageError::Rejected("injected failure".into()));
        }

        let mut tables = self.tables.write();
        let mut staged: BTreeMap<u32, TableData> = batch
            .tables()
            .into_iter()
            .map(|t| (t, tables.get(&t).cloned().unwrap_or_default()))
            .collect();

        apply(&mut staged, batch)?;

        tables.extend(staged);
        if let Some(max) = batch.rows().iter().map(|w| w.row_id).max() {
            self.max_row_id.fetch_max(max, Ordering::SeqCst);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, table: u32, row_id: u64) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(&table)
            .and_then(|t| t.rows.get(&row_id).cloned()))
    }

    fn scan(&self, table: u32) -> StorageResult<Vec<(u64, Vec<u8>)>> {
        Ok(self
            .tables
            .read()
            .get(&table)
            .map(|t| t.rows.iter().map(|(id, r)| (*id, r.clone())).collect())
            .unwrap_or_default())
    }

    fn lookup_index(&self, table: u32, index: &str, key: &[u8]) -> StorageResult<Vec<u64>> {
        Ok(self
            .tables
            .read()
            .get(&table)
            .and_then(|t| t.indexes.get(index))
            .and_then(|entries| entries.get(key))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn max_row_id(&self) -> StorageResult<u64> {
        Ok(self.max_row_id.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seeded() -> InMemoryAdapter {
        let adapter = InMemoryAdapter::new();
        let mut batch = WriteBatch::new();
        batch.put_row(1, 1, b"one".to_vec());
        batch.put_row(1, 2, b"two".to_vec());
        batch.add_index_entry(1, "pk", b"k1".to_vec(), 1);
        batch.add_index_entry(1, "pk", b"k2".to_vec(), 2);
        adapter.atomic_write(&batch).unwrap();
        adapter
    }

    #[test]
    fn memory_new_is_empty() {
        let adapter = InMemoryAdapter::new();
        assert!(adapter.scan(1).unwrap().is_empty());
        assert_eq!(adapter.max_row_id().unwrap(), 0);
        assert_eq!(adapter.write_count(), 0);
    }

    #[test]
    fn memory_write_then_read() {
        let adapter = seeded();
        assert_eq!(adapter.get(1, 1).unwrap(), Some(b"one".to_vec()));
        assert_eq!(adapter.scan(1).unwrap().len(), 2);
        assert_eq!(adapter.lookup_index(1, "pk", b"k2").unwrap(), vec![2]);
        assert_eq!(adapter.max_row_id().unwrap(), 2);
    }

    #[test]
    fn memory_relocate_moves_entry() {
        let adapter = seeded();
        let mut batch = WriteBatch::new();
        batch.relocate_index_entry(1, "pk", b"k1".to_vec(), b"k9".to_vec(), 1);
        adapter.atomic_write(&batch).unwrap();

        assert!(adapter.lookup_index(1, "pk", b"k1").unwrap().is_empty());
        assert_eq!(adapter.lookup_index(1, "pk", b"k9").unwrap(), vec![1]);
    }

    #[test]
    fn memory_rejected_batch_leaves_no_trace() {
        let adapter = seeded();
        let before = adapter.snapshot();

        let mut batch = WriteBatch::new();
        batch.put_row(1, 3, b"three".to_vec());
        batch.delete_row(1, 99);
        let result = adapter.atomic_write(&batch);

        assert!(matches!(result, Err(StorageError::MissingRow { row_id: 99, .. })));
        assert_eq!(adapter.snapshot(), before);
    }

    #[test]
    fn memory_missing_index_entry_rejects_batch() {
        let adapter = seeded();
        let before = adapter.snapshot();

        let mut batch = WriteBatch::new();
        batch.delete_row(1, 1);
        batch.remove_index_entry(1, "pk", b"nope".to_vec(), 1);

        assert!(matches!(
            adapter.atomic_write(&batch),
            Err(StorageError::MissingIndexEntry { .. })
        ));
        assert_eq!(adapter.snapshot(), before);
    }

    #[test]
    fn memory_injected_failure_is_consumed() {
        let adapter = InMemoryAdapter::new();
        adapter.fail_next_writes(2);

        let mut batch = WriteBatch::new();
        batch.put_row(4, 1, vec![1]);

        assert!(matches!(adapter.atomic_write(&batch), Err(StorageError::Rejected(_))));
        assert!(adapter.atomic_write(&batch).is_err());
        assert!(adapter.atomic_write(&batch).is_ok());
        assert_eq!(adapter.write_count(), 1);
    }

    proptest! {
        #[test]
        fn memory_index_len_tracks_adds_and_removes(keys in proptest::collection::btree_set(0u8..50, 1..20)) {
            let adapter = InMemoryAdapter::new();
            let mut add = WriteBatch::new();
            for (row, key) in keys.iter().enumerate() {
                add.add_index_entry(1, "idx", vec![*key], row as u64);
            }
            adapter.atomic_write(&add).unwrap();
            prop_assert_eq!(adapter.snapshot().index_len(1, "idx"), keys.len());

            let mut remove = WriteBatch::new();
            for (row, key) in keys.iter().enumerate() {
                remove.remove_index_entry(1, "idx", vec![*key], row as u64);
            }
            adapter.atomic_write(&remove).unwrap();
            prop_assert_eq!(adapter.snapshot().index_len(1, "idx"), 0);
        }
    }
}
