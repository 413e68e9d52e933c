//! Error types for Lockstep core.

use crate::types::{RowId, SubscriptionId, TableId, TaskId};
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// The kind of constraint a write breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Duplicate primary key.
    PrimaryKey,
    /// Duplicate key in a unique index.
    Unique,
    /// Null written to a non-nullable column.
    NotNull,
    /// Value does not match the column type, or wrong column count.
    Type,
    /// Dangling reference, or delete of a still-referenced row.
    ForeignKey,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PrimaryKey => "primary key",
            Self::Unique => "unique",
            Self::NotNull => "not null",
            Self::Type => "type",
            Self::ForeignKey => "foreign key",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in Lockstep core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A plan touched a table outside its task's declared scope.
    ///
    /// This is fatal: it means the scope resolver under-reported.
    #[error("scope violation in {task}: {access} access to {table} is outside the declared scope")]
    ScopeViolation {
        /// The offending task.
        task: TaskId,
        /// The table that was touched.
        table: TableId,
        /// `"read"` or `"write"`.
        access: &'static str,
    },

    /// A write breached a schema constraint.
    #[error("{kind} constraint violated on {table}: {message}")]
    ConstraintViolation {
        /// Table the write targeted.
        table: TableId,
        /// Which constraint was breached.
        kind: ConstraintKind,
        /// Description of the breach.
        message: String,
    },

    /// The persistence adapter rejected the atomic flush.
    #[error("atomic write failed for {task}: {source}")]
    AdapterWriteFailure {
        /// Task whose commit was rejected.
        task: TaskId,
        /// The adapter error.
        #[source]
        source: lockstep_storage::StorageError,
    },

    /// A read from the persistence adapter failed.
    #[error("storage error: {0}")]
    Storage(#[from] lockstep_storage::StorageError),

    /// A record or index key could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// Table not found in the catalog.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Name or id of the table.
        name: String,
    },

    /// Column not found in a table.
    #[error("column not found: {column} in {table}")]
    ColumnNotFound {
        /// The table searched.
        table: TableId,
        /// Name of the column.
        column: String,
    },

    /// Index not found in a table.
    #[error("index not found: {index} in {table}")]
    IndexNotFound {
        /// The table searched.
        table: TableId,
        /// Name of the index.
        index: String,
    },

    /// Row not found.
    #[error("row not found: {row} in {table}")]
    RowNotFound {
        /// The table searched.
        table: TableId,
        /// The missing row.
        row: RowId,
    },

    /// A pending task was withdrawn before admission.
    #[error("{task} withdrawn before admission")]
    Withdrawn {
        /// The withdrawn task.
        task: TaskId,
    },

    /// A pending task was not admitted within the caller's timeout.
    #[error("{task} not admitted within {timeout:?}")]
    Timeout {
        /// The withdrawn task.
        task: TaskId,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// The pending queue is full.
    #[error("pending queue full: {limit} tasks waiting")]
    QueueFull {
        /// Configured limit.
        limit: usize,
    },

    /// Subscription not found.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// An internal invariant was broken.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the broken invariant.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a scope violation error.
    pub fn scope_violation(task: TaskId, table: TableId, access: &'static str) -> Self {
        Self::ScopeViolation {
            task,
            table,
            access,
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(table: TableId, kind: ConstraintKind, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            table,
            kind,
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate a defect in Lockstep itself
    /// rather than a problem with the caller's data.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ScopeViolation { .. } | Self::Internal { .. })
    }

    /// Returns the constraint kind if this is a constraint violation.
    #[must_use]
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            Self::ConstraintViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let scope = CoreError::scope_violation(TaskId::new(1), TableId::new(2), "write");
        assert!(scope.is_fatal());
        assert!(CoreError::internal("lock underflow").is_fatal());
        assert!(!CoreError::DatabaseClosed.is_fatal());
    }

    #[test]
    fn constraint_message() {
        let err = CoreError::constraint(TableId::new(1), ConstraintKind::PrimaryKey, "id=1");
        assert_eq!(err.to_string(), "primary key constraint violated on tbl:1: id=1");
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::PrimaryKey));
    }
}
