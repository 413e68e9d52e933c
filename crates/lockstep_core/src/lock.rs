//! Per-table reader/writer lock bookkeeping.
//!
//! The lock table never blocks; it only answers whether a scope can be
//! granted and records grants and releases. Parking of waiting tasks is the
//! runner's job.
//!
//! Grants are all-or-nothing over a task's whole scope, so no task ever
//! holds part of its scope while waiting for the rest. This rules out
//! deadlock without any detection.

use crate::error::{CoreError, CoreResult};
use crate::scope::TableScope;
use crate::types::{TableId, TaskId};
use std::collections::HashMap;

/// Lock state of one table.
///
/// Invariant: a writer excludes all readers and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockEntry {
    reader_count: usize,
    writer: Option<TaskId>,
}

impl LockEntry {
    /// Returns the number of admitted readers.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.reader_count
    }

    /// Returns true if a writer holds the table.
    #[must_use]
    pub fn writer_held(&self) -> bool {
        self.writer.is_some()
    }

    /// Returns the task holding the write lock.
    #[must_use]
    pub fn writer(&self) -> Option<TaskId> {
        self.writer
    }

    fn is_free(&self) -> bool {
        self.reader_count == 0 && self.writer.is_none()
    }

    fn check(&self, table: TableId) -> CoreResult<()> {
        if self.writer.is_some() && self.reader_count > 0 {
            return Err(CoreError::internal(format!(
                "{table} has a writer and {} readers",
                self.reader_count
            )));
        }
        Ok(())
    }
}

/// Lock state of every table currently held by some task.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: HashMap<TableId, LockEntry>,
}

impl LockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock state of a table.
    #[must_use]
    pub fn entry(&self, table: TableId) -> LockEntry {
        self.entries.get(&table).cloned().unwrap_or_default()
    }

    /// Returns true if no table is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `scope` can be granted to `task` right now.
    ///
    /// Write tables need no readers and no writer. Read-only tables need no
    /// writer other than `task` itself.
    #[must_use]
    pub fn can_grant(&self, task: TaskId, scope: &TableScope) -> bool {
        let writes_free = scope
            .write_set()
            .iter()
            .all(|t| self.entries.get(t).map_or(true, LockEntry::is_free));
        let reads_free = scope
            .read_set()
            .iter()
            .filter(|t| !scope.can_write(**t))
            .all(|t| {
                self.entries
                    .get(t)
                    .and_then(|e| e.writer)
                    .map_or(true, |holder| holder == task)
            });
        writes_free && reads_free
    }

    /// Grants the whole scope to `task`.
    ///
    /// A table in both sets is locked once, as a writer.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the scope is not grantable. Callers must check
    /// [`LockTable::can_grant`] first; reaching this error is a scheduler bug.
    pub fn acquire(&mut self, task: TaskId, scope: &TableScope) -> CoreResult<()> {
        if !self.can_grant(task, scope) {
            return Err(CoreError::internal(format!(
                "{task} acquired an ungrantable scope"
            )));
        }
        for table in scope.write_set() {
            let entry = self.entries.entry(*table).or_default();
            entry.writer = Some(task);
            entry.check(*table)?;
        }
        for table in scope.read_set() {
            if scope.can_write(*table) {
                continue;
            }
            let entry = self.entries.entry(*table).or_default();
            entry.reader_count += 1;
            entry.check(*table)?;
        }
        Ok(())
    }

    /// Releases every lock `task` holds for `scope`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on reader underflow or if another task holds a
    /// write lock this task should hold.
    pub fn release(&mut self, task: TaskId, scope: &TableScope) -> CoreResult<()> {
        for table in scope.write_set() {
            let entry = self.entries.entry(*table).or_default();
            if entry.writer != Some(task) {
                return Err(CoreError::internal(format!(
                    "{task} released write lock on {table} held by {:?}",
                    entry.writer
                )));
            }
            entry.writer = None;
        }
        for table in scope.read_set() {
            if scope.can_write(*table) {
                continue;
            }
            let entry = self.entries.entry(*table).or_default();
            entry.reader_count = entry.reader_count.checked_sub(1).ok_or_else(|| {
                CoreError::internal(format!("{task} released unheld read lock on {table}"))
            })?;
        }
        self.entries.retain(|_, e| !e.is_free());
        Ok(())
    }
}
