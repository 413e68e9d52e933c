//! # Lockstep Testkit
//!
//! Test utilities for Lockstep.
//!
//! This crate provides:
//! - A small `user` / `job` / `assignment` catalog and database helpers
//! - Plans for holding a task inside execution, to stage contention
//! - Property-based test generators using proptest
//! - An integration harness that mirrors committed state in a plain model
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lockstep_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         db.exec(insert_job(1, "new")).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
