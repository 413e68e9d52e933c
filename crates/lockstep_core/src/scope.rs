//! Scope resolution.
//!
//! A task's scope is the set of tables it may read and the set it may
//! write. Under-reporting a table would let another task mutate it
//! concurrently, so resolution always errs toward including more.

use crate::error::CoreResult;
use crate::plan::PlanRef;
use crate::schema::Catalog;
use crate::types::TableId;
use std::collections::BTreeSet;

/// The read and write table sets of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableScope {
    read: BTreeSet<TableId>,
    write: BTreeSet<TableId>,
}

impl TableScope {
    /// Creates a scope from explicit sets.
    ///
    /// Every write table is added to the read set.
    pub fn new(
        read: impl IntoIterator<Item = TableId>,
        write: impl IntoIterator<Item = TableId>,
    ) -> Self {
        let write: BTreeSet<TableId> = write.into_iter().collect();
        let mut read: BTreeSet<TableId> = read.into_iter().collect();
        read.extend(write.iter().copied());
        Self { read, write }
    }

    /// Returns the tables the task may read.
    #[must_use]
    pub fn read_set(&self) -> &BTreeSet<TableId> {
        &self.read
    }

    /// Returns the tables the task may write.
    #[must_use]
    pub fn write_set(&self) -> &BTreeSet<TableId> {
        &self.write
    }

    /// Returns true if the task may read `table`.
    #[must_use]
    pub fn can_read(&self, table: TableId) -> bool {
        self.read.contains(&table)
    }

    /// Returns true if the task may write `table`.
    #[must_use]
    pub fn can_write(&self, table: TableId) -> bool {
        self.write.contains(&table)
    }

    /// Returns true if the scope contains no write tables.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.write.is_empty()
    }

    /// Returns true if any of `tables` is in the read set.
    #[must_use]
    pub fn reads_any(&self, tables: &BTreeSet<TableId>) -> bool {
        !self.read.is_disjoint(tables)
    }

    /// Returns true if any of `tables` is in the write set.
    #[must_use]
    pub fn writes_any(&self, tables: &BTreeSet<TableId>) -> bool {
        !self.write.is_disjoint(tables)
    }
}

/// Computes the scope of an ordered list of plans.
///
/// Pure and deterministic. Beyond the tables each plan declares, every
/// written table pulls in the tables it references by foreign key and the
/// tables that reference it, since constraint checks read both.
///
/// # Errors
///
/// Returns `TableNotFound` if a plan declares a table the catalog does not
/// know.
pub fn compute_scope(plans: &[PlanRef], catalog: &Catalog) -> CoreResult<TableScope> {
    let mut read = BTreeSet::new();
    let mut write = BTreeSet::new();

    for plan in plans {
        for table in plan.inputs() {
            catalog.table(table)?;
            read.insert(table);
        }
        for table in plan.outputs() {
            catalog.table(table)?;
            write.insert(table);
        }
    }

    for table in &write {
        let schema = catalog.table(*table)?;
        read.extend(schema.foreign_keys().iter().map(|fk| fk.parent));
        read.extend(catalog.referencing(*table).map(|(child, _)| child.id()));
    }

    Ok(TableScope::new(read, write))
}
