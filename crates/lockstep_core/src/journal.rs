//! Per-task staged diff and the commit protocol.
//!
//! Every mutation a task makes is recorded here and nowhere else until
//! commit. The journal is kept *net* as mutations arrive: an insert followed
//! by a delete of the same row leaves nothing behind, an update of an
//! inserted row stays an insert, and so on. At commit the net effect is
//! turned into one [`WriteBatch`] carrying both row records and index
//! deltas, which the persistence adapter applies atomically.

use crate::error::{ConstraintKind, CoreError, CoreResult};
use crate::record::{encode_index_key, RowCodec};
use crate::row::Row;
use crate::schema::{key_of, Catalog, IndexDef, IndexKey, IndexKind, TableSchema};
use crate::scope::TableScope;
use crate::task::ExecEnv;
use crate::types::{RowId, TableId, TaskId};
use crate::value::Value;
use lockstep_storage::{PersistenceAdapter, WriteBatch};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Staged mutations of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableJournal {
    inserted: BTreeMap<RowId, Row>,
    updated: BTreeMap<RowId, (Row, Row)>,
    deleted: BTreeMap<RowId, Row>,
}

impl TableJournal {
    /// Rows that did not exist before the task.
    #[must_use]
    pub fn inserted(&self) -> &BTreeMap<RowId, Row> {
        &self.inserted
    }

    /// Persisted rows replaced by the task, as `(old, new)`.
    #[must_use]
    pub fn updated(&self) -> &BTreeMap<RowId, (Row, Row)> {
        &self.updated
    }

    /// Persisted rows removed by the task, with their old payload.
    #[must_use]
    pub fn deleted(&self) -> &BTreeMap<RowId, Row> {
        &self.deleted
    }

    /// Returns true if committing this table would change nothing.
    #[must_use]
    pub fn is_net_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.deleted.is_empty()
            && self.updated.values().all(|(old, new)| old == new)
    }

    fn staged(&self, id: RowId) -> Staged<'_> {
        if let Some(row) = self.inserted.get(&id) {
            Staged::Present(row)
        } else if let Some((_, new)) = self.updated.get(&id) {
            Staged::Present(new)
        } else if self.deleted.contains_key(&id) {
            Staged::Deleted
        } else {
            Staged::Untouched
        }
    }

    fn present_rows(&self) -> impl Iterator<Item = &Row> {
        self.inserted
            .values()
            .chain(self.updated.values().map(|(_, new)| new))
    }
}

/// What a journal knows about one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Staged<'a> {
    /// The task has not touched the row; read through to storage.
    Untouched,
    /// The task's current version of the row.
    Present(&'a Row),
    /// The task deleted the row.
    Deleted,
}

/// The net diff of a task, ready for the persistence adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitDiff {
    /// Row and index writes, applied atomically.
    pub batch: WriteBatch,
    /// Tables whose contents change; each gets exactly one version bump.
    pub tables: BTreeSet<TableId>,
    /// Number of row writes in the batch.
    pub rows: usize,
}

impl CommitDiff {
    /// Returns true if committing would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// The staged diff of one task. Dropped on rollback, flushed on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    task: TaskId,
    tables: BTreeMap<TableId, TableJournal>,
}

impl Journal {
    /// Creates an empty journal for a task.
    #[must_use]
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            tables: BTreeMap::new(),
        }
    }

    /// Returns the owning task.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Returns the staged mutations of a table, if any.
    #[must_use]
    pub fn table(&self, table: TableId) -> Option<&TableJournal> {
        self.tables.get(&table)
    }

    /// Returns true if committing would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableJournal::is_net_empty)
    }

    pub(crate) fn staged(&self, table: TableId, id: RowId) -> Staged<'_> {
        self.tables
            .get(&table)
            .map_or(Staged::Untouched, |t| t.staged(id))
    }

    /// Stages a new row.
    pub(crate) fn record_insert(&mut self, table: TableId, row: Row) -> CoreResult<()> {
        let t = self.tables.entry(table).or_default();
        let id = row.id();
        if t.inserted.contains_key(&id) || t.updated.contains_key(&id) {
            return Err(CoreError::internal(format!("{id} inserted twice into {table}")));
        }
        match t.deleted.remove(&id) {
            Some(old) => {
                t.updated.insert(id, (old, row));
            }
            None => {
                t.inserted.insert(id, row);
            }
        }
        Ok(())
    }

    /// Stages new values for a row whose current version is `current`.
    pub(crate) fn record_update(
        &mut self,
        table: TableId,
        current: Row,
        values: Vec<Value>,
    ) -> CoreResult<()> {
        let t = self.tables.entry(table).or_default();
        let id = current.id();
        let new = Row::new(id, values);
        if let Some(row) = t.inserted.get_mut(&id) {
            *row = new;
        } else if let Some((_, staged)) = t.updated.get_mut(&id) {
            *staged = new;
        } else if t.deleted.contains_key(&id) {
            return Err(CoreError::RowNotFound { table, row: id });
        } else {
            t.updated.insert(id, (current, new));
        }
        Ok(())
    }

    /// Stages removal of a row whose current version is `current`.
    pub(crate) fn record_delete(&mut self, table: TableId, current: Row) -> CoreResult<()> {
        let t = self.tables.entry(table).or_default();
        let id = current.id();
        if t.inserted.remove(&id).is_some() {
            return Ok(());
        }
        if let Some((old, _)) = t.updated.remove(&id) {
            t.deleted.insert(id, old);
            return Ok(());
        }
        if t.deleted.contains_key(&id) {
            return Err(CoreError::RowNotFound { table, row: id });
        }
        t.deleted.insert(id, current);
        Ok(())
    }

    /// Applies the journal on top of persisted rows, returning the task's
    /// view of the table in row id order.
    pub(crate) fn overlay(&self, table: TableId, persisted: Vec<Row>) -> Vec<Row> {
        let Some(t) = self.tables.get(&table) else {
            return persisted;
        };
        let mut rows: BTreeMap<RowId, Row> = persisted.into_iter().map(|r| (r.id(), r)).collect();
        for id in t.deleted.keys() {
            rows.remove(id);
        }
        for row in t.present_rows() {
            rows.insert(row.id(), row.clone());
        }
        rows.into_values().collect()
    }

    /// Computes the net row diff and index diff of the whole task.
    ///
    /// Index deltas are derived from old and new payloads with each table's
    /// key extractor: inserts add, deletes remove, and updates relocate
    /// only the indexes whose key changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a table is unknown or a row cannot be encoded.
    pub fn commit_diff(&self, catalog: &Catalog) -> CoreResult<CommitDiff> {
        let mut diff = CommitDiff::default();
        for (table, t) in &self.tables {
            if t.is_net_empty() {
                continue;
            }
            let schema = catalog.table(*table)?;
            let codec = RowCodec::new(schema);
            let raw = table.as_u32();

            for (id, row) in &t.inserted {
                diff.batch.put_row(raw, id.as_u64(), codec.encode(row)?);
                for def in schema.indexes() {
                    let key = encode_index_key(&key_of(def, row.values())?)?;
                    diff.batch.add_index_entry(raw, def.name.as_str(), key, id.as_u64());
                }
                diff.rows += 1;
            }

            for (id, (old, new)) in &t.updated {
                if old == new {
                    continue;
                }
                diff.batch.put_row(raw, id.as_u64(), codec.encode(new)?);
                for def in schema.indexes() {
                    let from = key_of(def, old.values())?;
                    let to = key_of(def, new.values())?;
                    if from != to {
                        diff.batch.relocate_index_entry(
                            raw,
                            def.name.as_str(),
                            encode_index_key(&from)?,
                            encode_index_key(&to)?,
                            id.as_u64(),
                        );
                    }
                }
                diff.rows += 1;
            }

            for (id, old) in &t.deleted {
                diff.batch.delete_row(raw, id.as_u64());
                for def in schema.indexes() {
                    let key = encode_index_key(&key_of(def, old.values())?)?;
                    diff.batch.remove_index_entry(raw, def.name.as_str(), key, id.as_u64());
                }
                diff.rows += 1;
            }

            diff.tables.insert(*table);
        }
        Ok(diff)
    }

    /// Computes the commit diff and hands it to the adapter's atomic write.
    ///
    /// An empty diff never reaches the adapter.
    ///
    /// # Errors
    ///
    /// Returns `AdapterWriteFailure` if the adapter rejects the batch. In
    /// that case nothing was persisted.
    pub fn flush(
        &self,
        catalog: &Catalog,
        adapter: &dyn PersistenceAdapter,
    ) -> CoreResult<CommitDiff> {
        let diff = self.commit_diff(catalog)?;
        if diff.is_empty() {
            return Ok(diff);
        }
        adapter
            .atomic_write(&diff.batch)
            .map_err(|source| CoreError::AdapterWriteFailure {
                task: self.task,
                source,
            })?;
        Ok(diff)
    }
}

/// A task's window onto the database while its plans execute.
///
/// Reads consult the task's journal first and fall back to the persisted
/// snapshot, so a task always sees its own uncommitted writes. Writes go to
/// the journal only. Every access is checked against the task's scope.
pub struct JournalView<'a> {
    env: &'a ExecEnv<'a>,
    task: TaskId,
    scope: &'a TableScope,
    journal: &'a mut Journal,
    params: &'a [Value],
}

impl<'a> JournalView<'a> {
    pub(crate) fn new(
        env: &'a ExecEnv<'a>,
        scope: &'a TableScope,
        journal: &'a mut Journal,
        params: &'a [Value],
    ) -> Self {
        Self {
            env,
            task: journal.task(),
            scope,
            journal,
            params,
        }
    }

    /// Returns the task this view belongs to.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Returns the parameters the task was bound to.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        self.params
    }

    /// Returns the schema of a table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn schema(&self, table: TableId) -> CoreResult<Arc<TableSchema>> {
        self.env.catalog.table(table).cloned()
    }

    fn check_read(&self, table: TableId) -> CoreResult<()> {
        if self.scope.can_read(table) {
            Ok(())
        } else {
            Err(CoreError::scope_violation(self.task, table, "read"))
        }
    }

    fn check_write(&self, table: TableId) -> CoreResult<()> {
        if self.scope.can_write(table) {
            Ok(())
        } else {
            Err(CoreError::scope_violation(self.task, table, "write"))
        }
    }

    fn load(&self, schema: &TableSchema, id: RowId) -> CoreResult<Option<Row>> {
        self.env
            .adapter
            .get(schema.id().as_u32(), id.as_u64())?
            .map(|bytes| RowCodec::new(schema).decode(id, &bytes))
            .transpose()
    }

    /// Reads one row as the task currently sees it.
    ///
    /// # Errors
    ///
    /// Returns `ScopeViolation` if the table is outside the read scope.
    pub fn get(&self, table: TableId, id: RowId) -> CoreResult<Option<Row>> {
        self.check_read(table)?;
        match self.journal.staged(table, id) {
            Staged::Present(row) => Ok(Some(row.clone())),
            Staged::Deleted => Ok(None),
            Staged::Untouched => {
                let schema = self.schema(table)?;
                self.load(&schema, id)
            }
        }
    }

    /// Reads every row of a table as the task currently sees it, in row id
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `ScopeViolation` if the table is outside the read scope.
    pub fn scan(&self, table: TableId) -> CoreResult<Vec<Row>> {
        self.check_read(table)?;
        let schema = self.schema(table)?;
        let codec = RowCodec::new(&schema);
        let persisted = self
            .env
            .adapter
            .scan(table.as_u32())?
            .into_iter()
            .map(|(id, bytes)| codec.decode(RowId::new(id), &bytes))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(self.journal.overlay(table, persisted))
    }

    /// Finds the rows stored under `key` in a table's index, as the task
    /// currently sees them.
    ///
    /// # Errors
    ///
    /// Returns `ScopeViolation` if the table is outside the read scope, or
    /// `IndexNotFound` for an unknown index.
    pub fn lookup(&self, table: TableId, index: &str, key: &IndexKey) -> CoreResult<Vec<Row>> {
        self.check_read(table)?;
        let schema = self.schema(table)?;
        let def = schema.index(index)?;
        self.lookup_def(&schema, def, key)
    }

    fn lookup_def(&self, schema: &TableSchema, def: &IndexDef, key: &IndexKey) -> CoreResult<Vec<Row>> {
        let table = schema.id();
        let persisted = self.env.adapter.lookup_index(
            table.as_u32(),
            &def.name,
            &encode_index_key(key)?,
        )?;

        let mut found = BTreeMap::new();
        for raw in &persisted {
            let id = RowId::new(*raw);
            match self.journal.staged(table, id) {
                Staged::Untouched => {
                    if let Some(row) = self.load(schema, id)? {
                        found.insert(id, row);
                    }
                }
                Staged::Present(row) => {
                    if key_of(def, row.values())? == *key {
                        found.insert(id, row.clone());
                    }
                }
                Staged::Deleted => {}
            }
        }
        if let Some(t) = self.journal.table(table) {
            for row in t.present_rows() {
                if !found.contains_key(&row.id()) && key_of(def, row.values())? == *key {
                    found.insert(row.id(), row.clone());
                }
            }
        }
        Ok(found.into_values().collect())
    }

    /// Stages a new row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `ScopeViolation` outside the write scope, or
    /// `ConstraintViolation` if the row breaks a schema constraint.
    pub fn insert(&mut self, table: TableId, values: Vec<Value>) -> CoreResult<RowId> {
        self.check_write(table)?;
        let schema = self.schema(table)?;
        let id = self.env.row_ids.allocate();
        let row = schema.create_row(id, values)?;
        self.check_unique(&schema, &row)?;
        self.check_parents(&schema, row.values())?;
        self.journal.record_insert(table, row)?;
        Ok(id)
    }

    /// Stages new values for an existing row.
    ///
    /// # Errors
    ///
    /// Returns `ScopeViolation` outside the write scope, `RowNotFound` if
    /// the task cannot see the row, or `ConstraintViolation`.
    pub fn update(&mut self, table: TableId, id: RowId, values: Vec<Value>) -> CoreResult<()> {
        self.check_write(table)?;
        let schema = self.schema(table)?;
        let current = self
            .get(table, id)?
            .ok_or(CoreError::RowNotFound { table, row: id })?;
        let next = schema.create_row(id, values)?;
        self.check_unique(&schema, &next)?;
        self.check_parents(&schema, next.values())?;
        if let Some(pk) = schema.primary_key() {
            if key_of(pk, current.values())? != key_of(pk, next.values())? {
                self.check_no_children(&schema, &current)?;
            }
        }
        self.journal.record_update(table, current, next.into_values())
    }

    /// Stages removal of a row and returns its last version.
    ///
    /// # Errors
    ///
    /// Returns `ScopeViolation` outside the write scope, `RowNotFound` if
    /// the task cannot see the row, or `ConstraintViolation` if other rows
    /// still reference it.
    pub fn delete(&mut self, table: TableId, id: RowId) -> CoreResult<Row> {
        self.check_write(table)?;
        let schema = self.schema(table)?;
        let current = self
            .get(table, id)?
            .ok_or(CoreError::RowNotFound { table, row: id })?;
        self.check_no_children(&schema, &current)?;
        self.journal.record_delete(table, current.clone())?;
        Ok(current)
    }

    fn check_unique(&self, schema: &TableSchema, row: &Row) -> CoreResult<()> {
        for def in schema.indexes().iter().filter(|d| d.is_unique()) {
            let key = key_of(def, row.values())?;
            if key.has_null() {
                continue;
            }
            let holders = self.lookup_def(schema, def, &key)?;
            if holders.iter().any(|r| r.id() != row.id()) {
                let kind = if def.kind == IndexKind::Primary {
                    ConstraintKind::PrimaryKey
                } else {
                    ConstraintKind::Unique
                };
                return Err(CoreError::constraint(
                    schema.id(),
                    kind,
                    format!("duplicate key {:?} in index {}", key.0, def.name),
                ));
            }
        }
        Ok(())
    }

    fn check_parents(&self, schema: &TableSchema, values: &[Value]) -> CoreResult<()> {
        if !self.env.enforce_foreign_keys {
            return Ok(());
        }
        for fk in schema.foreign_keys() {
            let Some(value) = values.get(fk.column).filter(|v| !v.is_null()) else {
                continue;
            };
            self.check_read(fk.parent)?;
            let parent = self.schema(fk.parent)?;
            let pk = parent.primary_key().ok_or_else(|| {
                CoreError::internal(format!("{} has no primary key", parent.name()))
            })?;
            let key = IndexKey(vec![value.clone()]);
            if self.lookup_def(&parent, pk, &key)?.is_empty() {
                return Err(CoreError::constraint(
                    schema.id(),
                    ConstraintKind::ForeignKey,
                    format!("{value} not found in {}", parent.name()),
                ));
            }
        }
        Ok(())
    }

    fn check_no_children(&self, schema: &TableSchema, row: &Row) -> CoreResult<()> {
        if !self.env.enforce_foreign_keys {
            return Ok(());
        }
        let Some(pk) = schema.primary_key() else {
            return Ok(());
        };
        let Some(key) = pk.columns.first().and_then(|c| row.get(*c)) else {
            return Ok(());
        };
        for (child, fk) in self.env.catalog.referencing(schema.id()) {
            let referenced = self
                .scan(child.id())?
                .iter()
                .any(|r| r.get(fk.column) == Some(key) && !(child.id() == schema.id() && r.id() == row.id()));
            if referenced {
                return Err(CoreError::constraint(
                    schema.id(),
                    ConstraintKind::ForeignKey,
                    format!("{} is still referenced by {}", row.id(), child.name()),
                ));
            }
        }
        Ok(())
    }
}
