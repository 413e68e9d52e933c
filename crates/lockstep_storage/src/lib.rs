//! # Lockstep Storage
//!
//! Persistence adapter abstraction for Lockstep.
//!
//! This crate is the lowest layer of Lockstep. An adapter is an **opaque
//! record store**: it keeps encoded row records and encoded index keys per
//! table and never interprets them.
//!
//! ## Design Principles
//!
//! - The only mutation primitive is [`PersistenceAdapter::atomic_write`],
//!   which applies a whole [`WriteBatch`] or nothing
//! - Adapters provide durability, not isolation; Lockstep schedules
//!   transactions so that no two conflicting writers ever reach the adapter
//! - Adapters must be `Send + Sync` for concurrent readers
//!
//! ## Available Adapters
//!
//! - [`InMemoryAdapter`] - For testing and ephemeral databases, with fault
//!   injection for exercising rollback paths
//!
//! ## Example
//!
//! ```rust
//! use lockstep_storage::{InMemoryAdapter, PersistenceAdapter, WriteBatch};
//!
//! let adapter = InMemoryAdapter::new();
//! let mut batch = WriteBatch::new();
//! batch.put_row(1, 7, b"record".to_vec());
//! batch.add_index_entry(1, "pk", b"key".to_vec(), 7);
//! adapter.atomic_write(&batch).unwrap();
//!
//! assert_eq!(adapter.get(1, 7).unwrap(), Some(b"record".to_vec()));
//! assert_eq!(adapter.lookup_index(1, "pk", b"key").unwrap(), vec![7]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod batch;
mod error;
mod memory;

pub use adapter::PersistenceAdapter;
pub use batch::{IndexOp, IndexWrite, RowOp, RowWrite, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use memory::{InMemoryAdapter, MemorySnapshot};
