//! Data-driven table descriptors.
//!
//! Tables are described by [`TableSchema`] values rather than generated
//! types. Generic row validation, constraint checks and index key
//! extraction interpret these descriptors at runtime.
//!
//! ```rust
//! use lockstep_core::{Catalog, ColumnType, TableBuilder, TableId};
//!
//! let job = TableBuilder::new(TableId::new(1), "job")
//!     .column("id", ColumnType::Integer, false)
//!     .column("status", ColumnType::Text, false)
//!     .primary_key(&["id"])
//!     .index("by_status", &["status"], false)
//!     .build()
//!     .unwrap();
//!
//! let mut catalog = Catalog::new();
//! catalog.add_table(job).unwrap();
//! assert!(catalog.table_by_name("job").is_ok());
//! ```

use crate::error::{ConstraintKind, CoreError, CoreResult};
use crate::row::Row;
use crate::types::{RowId, TableId};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Name given to the primary key index of every table that declares one.
pub const PRIMARY_KEY_INDEX: &str = "pk";

/// Column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Binary payload; persisted as a hex string.
    Bytes,
    /// Timestamp; persisted as integer milliseconds.
    DateTime,
}

impl ColumnType {
    /// Returns true if `value` can be stored in a column of this type.
    ///
    /// `Null` is accepted here; nullability is checked separately.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Bool, Value::Bool(_))
                | (Self::Integer, Value::Integer(_))
                | (Self::Text, Value::Text(_))
                | (Self::Bytes, Value::Bytes(_))
                | (Self::DateTime, Value::DateTime(_))
        )
    }
}

/// A column descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name, unique within the table.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
    /// Whether `Null` may be stored.
    pub nullable: bool,
}

/// Role of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// The table's primary key. Unique.
    Primary,
    /// A unique secondary index.
    Unique,
    /// A non-unique secondary index.
    Secondary,
}

/// An index descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name, unique within the table.
    pub name: String,
    /// Positions of the key columns, in key order.
    pub columns: Vec<usize>,
    /// Role of the index.
    pub kind: IndexKind,
}

impl IndexDef {
    /// Returns true if the index rejects duplicate keys.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        matches!(self.kind, IndexKind::Primary | IndexKind::Unique)
    }
}

/// A single-column reference to another table's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Position of the referencing column in this table.
    pub column: usize,
    /// Referenced table.
    pub parent: TableId,
}

/// A composite index key: the indexed column values, in key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(pub Vec<Value>);

impl IndexKey {
    /// Returns true if any component is `Null`.
    ///
    /// Keys containing `Null` never conflict in unique indexes.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

/// Describes one table: identity, columns, constraints and indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    id: TableId,
    name: String,
    columns: Vec<Column>,
    indexes: Vec<IndexDef>,
    foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Returns the table ID.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the columns in positional order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns all index definitions, primary key first if present.
    #[must_use]
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Returns the foreign keys declared by this table.
    #[must_use]
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Returns the primary key index, if declared.
    #[must_use]
    pub fn primary_key(&self) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }

    /// Returns the position of a column by name.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if no column has that name.
    pub fn column_index(&self, name: &str) -> CoreResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| CoreError::ColumnNotFound {
                table: self.id,
                column: name.to_string(),
            })
    }

    /// Returns an index definition by name.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` if no index has that name.
    pub fn index(&self, name: &str) -> CoreResult<&IndexDef> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| CoreError::IndexNotFound {
                table: self.id,
                index: name.to_string(),
            })
    }

    /// Builds a validated row from positional values.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the values do not fit the columns.
    pub fn create_row(&self, id: RowId, values: Vec<Value>) -> CoreResult<Row> {
        self.validate_values(&values)?;
        Ok(Row::new(id, values))
    }

    /// Checks arity, column types and nullability.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` with kind `Type` or `NotNull`.
    pub fn validate_values(&self, values: &[Value]) -> CoreResult<()> {
        if values.len() != self.columns.len() {
            return Err(CoreError::constraint(
                self.id,
                ConstraintKind::Type,
                format!(
                    "expected {} values, got {}",
                    self.columns.len(),
                    values.len()
                ),
            ));
        }
        for (column, value) in self.columns.iter().zip(values) {
            if value.is_null() && !column.nullable {
                return Err(CoreError::constraint(
                    self.id,
                    ConstraintKind::NotNull,
                    format!("column {} is not nullable", column.name),
                ));
            }
            if !column.ty.accepts(value) {
                return Err(CoreError::constraint(
                    self.id,
                    ConstraintKind::Type,
                    format!(
                        "column {} expects {:?}, got {}",
                        column.name,
                        column.ty,
                        value.type_name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Extracts the key of the named index from a row payload.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` for an unknown index, or `Internal` if the
    /// payload is shorter than the index's columns require.
    pub fn key_of_index(&self, index: &str, values: &[Value]) -> CoreResult<IndexKey> {
        let def = self.index(index)?;
        key_of(def, values)
    }
}

/// Extracts an index key from a payload using an index definition.
pub(crate) fn key_of(def: &IndexDef, values: &[Value]) -> CoreResult<IndexKey> {
    def.columns
        .iter()
        .map(|&c| {
            values.get(c).cloned().ok_or_else(|| {
                CoreError::internal(format!("payload too short for index {}", def.name))
            })
        })
        .collect::<CoreResult<Vec<_>>>()
        .map(IndexKey)
}

/// Builder for [`TableSchema`].
///
/// Column references are resolved by name when [`TableBuilder::build`] is
/// called, so columns may be declared in any order relative to indexes.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    id: TableId,
    name: String,
    columns: Vec<Column>,
    indexes: Vec<(String, Vec<String>, IndexKind)>,
    foreign_keys: Vec<(String, TableId)>,
}

impl TableBuilder {
    /// Starts describing a table.
    #[must_use]
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        self.columns.push(Column {
            name: name.into(),
            ty,
            nullable,
        });
        self
    }

    /// Declares the primary key.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.indexes.push((
            PRIMARY_KEY_INDEX.to_string(),
            columns.iter().map(|c| (*c).to_string()).collect(),
            IndexKind::Primary,
        ));
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        let kind = if unique {
            IndexKind::Unique
        } else {
            IndexKind::Secondary
        };
        self.indexes.push((
            name.into(),
            columns.iter().map(|c| (*c).to_string()).collect(),
            kind,
        ));
        self
    }

    /// Declares that `column` references the primary key of `parent`.
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>, parent: TableId) -> Self {
        self.foreign_keys.push((column.into(), parent));
        self
    }

    /// Validates and builds the schema.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate column or index names, unknown column
    /// references, more than one primary key, or an empty index.
    pub fn build(self) -> CoreResult<TableSchema> {
        let mut schema = TableSchema {
            id: self.id,
            name: self.name,
            columns: self.columns,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        };

        for (i, column) in schema.columns.iter().enumerate() {
            if schema.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(CoreError::invalid_operation(format!(
                    "duplicate column {} in table {}",
                    column.name, schema.name
                )));
            }
        }

        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for (name, columns, kind) in self.indexes {
            if columns.is_empty() {
                return Err(CoreError::invalid_operation(format!("index {name} has no columns")));
            }
            if primary.iter().chain(&secondary).any(|d: &IndexDef| d.name == name) {
                return Err(CoreError::invalid_operation(format!("duplicate index {name}")));
            }
            let columns = columns
                .iter()
                .map(|c| schema.column_index(c))
                .collect::<CoreResult<Vec<_>>>()?;
            let def = IndexDef {
                name,
                columns,
                kind,
            };
            if kind == IndexKind::Primary {
                primary.push(def);
            } else {
                secondary.push(def);
            }
        }
        if primary.len() > 1 {
            return Err(CoreError::invalid_operation(format!(
                "table {} declares more than one primary key",
                schema.name
            )));
        }
        primary.extend(secondary);
        schema.indexes = primary;

        for (column, parent) in self.foreign_keys {
            let column = schema.column_index(&column)?;
            schema.foreign_keys.push(ForeignKey { column, parent });
        }
        Ok(schema)
    }
}

/// The set of tables known to a database.
///
/// The catalog is immutable once the database is opened and is shared
/// behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<TableId, Arc<TableSchema>>,
    by_name: HashMap<String, TableId>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table.
    ///
    /// Tables referenced by foreign keys must be registered first.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate ids or names, or a foreign key whose
    /// parent is unknown or lacks a single-column primary key.
    pub fn add_table(&mut self, schema: TableSchema) -> CoreResult<()> {
        if self.tables.contains_key(&schema.id) || self.by_name.contains_key(&schema.name) {
            return Err(CoreError::invalid_operation(format!(
                "table {} ({}) already registered",
                schema.name, schema.id
            )));
        }
        for fk in &schema.foreign_keys {
            let parent = if fk.parent == schema.id {
                &schema
            } else {
                self.table(fk.parent)?.as_ref()
            };
            let single = parent.primary_key().is_some_and(|pk| pk.columns.len() == 1);
            if !single {
                return Err(CoreError::invalid_operation(format!(
                    "foreign key from {} references {} which has no single-column primary key",
                    schema.name, parent.name
                )));
            }
        }
        self.by_name.insert(schema.name.clone(), schema.id);
        self.tables.insert(schema.id, Arc::new(schema));
        Ok(())
    }

    /// Looks up a table by id.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the id is unknown.
    pub fn table(&self, id: TableId) -> CoreResult<&Arc<TableSchema>> {
        self.tables
            .get(&id)
            .ok_or_else(|| CoreError::table_not_found(id.to_string()))
    }

    /// Looks up a table by name.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` if the name is unknown.
    pub fn table_by_name(&self, name: &str) -> CoreResult<&Arc<TableSchema>> {
        self.by_name
            .get(name)
            .and_then(|id| self.tables.get(id))
            .ok_or_else(|| CoreError::table_not_found(name))
    }

    /// Returns the `(child table, foreign key)` pairs that reference `parent`.
    pub fn referencing(&self, parent: TableId) -> impl Iterator<Item = (&TableSchema, &ForeignKey)> {
        self.tables.values().flat_map(move |t| {
            t.foreign_keys
                .iter()
                .filter(move |fk| fk.parent == parent)
                .map(move |fk| (t.as_ref(), fk))
        })
    }

    /// Iterates over all tables in id order.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values()
    }

    /// Returns the number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no tables are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
