//! Rows.

use crate::types::RowId;
use crate::value::Value;

/// A table row: a stable id plus positional column values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    id: RowId,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row without validation.
    ///
    /// Use [`crate::TableSchema::create_row`] to validate against a table.
    #[must_use]
    pub fn new(id: RowId, values: Vec<Value>) -> Self {
        Self { id, values }
    }

    /// Returns the row id.
    #[must_use]
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Returns the column values in positional order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value at a column position.
    #[must_use]
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }

    /// Consumes the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
