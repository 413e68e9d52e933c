//! Error types for persistence operations.

use std::io;
use thiserror::Error;

/// Result type for persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a persistence adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A batch deleted a row that is not stored.
    #[error("row {row_id} not found in table {table}")]
    MissingRow {
        /// Table addressed by the batch.
        table: u32,
        /// Row addressed by the batch.
        row_id: u64,
    },

    /// A batch removed or relocated an index entry that is not stored.
    #[error("index entry for row {row_id} not found in {table}.{index}")]
    MissingIndexEntry {
        /// Table addressed by the batch.
        table: u32,
        /// Index addressed by the batch.
        index: String,
        /// Row the entry should point at.
        row_id: u64,
    },

    /// The write was rejected by the adapter.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The store is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The store is closed.
    #[error("storage is closed")]
    Closed,
}
