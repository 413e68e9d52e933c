//! Persistence adapter trait definition.

use crate::batch::WriteBatch;
use crate::error::StorageResult;

/// A persisted record store for Lockstep.
///
/// Adapters store **opaque records**. Tables are identified by a `u32`, rows
/// by a `u64`, and index keys are byte strings produced by the caller.
/// Lockstep owns all record and key encodings.
///
/// # Invariants
///
/// - `atomic_write` applies every entry of the batch or none of them
/// - After `atomic_write` returns `Ok`, the batch is durable
/// - Reads never observe a partially applied batch
/// - Adapters must be `Send + Sync`; reads may run concurrently with each
///   other and with `atomic_write`
///
/// Adapters provide **no isolation** between callers. Lockstep's scheduler
/// guarantees that conflicting writers never submit batches concurrently.
///
/// # Implementors
///
/// - [`super::InMemoryAdapter`] - For testing
pub trait PersistenceAdapter: Send + Sync {
    /// Applies a batch of row and index writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is rejected. A rejected batch leaves
    /// the store exactly as it was before the call.
    fn atomic_write(&self, batch: &WriteBatch) -> StorageResult<()>;

    /// Reads the record stored for `row_id` in `table`.
    ///
    /// Returns `Ok(None)` if no such row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, table: u32, row_id: u64) -> StorageResult<Option<Vec<u8>>>;

    /// Returns every `(row_id, record)` pair of `table`, ordered by row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan(&self, table: u32) -> StorageResult<Vec<(u64, Vec<u8>)>>;

    /// Returns the row ids stored under `key` in the named index, ordered.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn lookup_index(&self, table: u32, index: &str, key: &[u8]) -> StorageResult<Vec<u64>>;

    /// Returns the highest row id ever persisted in any table, or 0.
    ///
    /// Used to seed row id allocation when a database is opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn max_row_id(&self) -> StorageResult<u64>;
}
