//! Execution environment shared by running tasks.

use crate::schema::Catalog;
use crate::types::RowId;
use lockstep_storage::PersistenceAdapter;
use std::sync::atomic::{AtomicU64, Ordering};

/// Everything a running task may touch besides its own journal.
pub(crate) struct ExecEnv<'a> {
    pub catalog: &'a Catalog,
    pub adapter: &'a dyn PersistenceAdapter,
    pub row_ids: &'a RowIdAllocator,
    pub enforce_foreign_keys: bool,
}

/// Hands out row ids that are unique across the database.
///
/// Ids taken by tasks that later roll back are not reused.
#[derive(Debug)]
pub(crate) struct RowIdAllocator {
    next: AtomicU64,
}

impl RowIdAllocator {
    /// Starts allocating just above the highest id already persisted.
    pub fn starting_after(max: u64) -> Self {
        Self {
            next: AtomicU64::new(max + 1),
        }
    }

    pub fn allocate(&self) -> RowId {
        RowId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic() {
        let ids = RowIdAllocator::starting_after(41);
        assert_eq!(ids.allocate(), RowId::new(42));
        assert_eq!(ids.allocate(), RowId::new(43));
    }
}
