//! # ItemDB Testkit
//!
//! Test utilities for ItemDB.
//!
//! This crate provides:
//! - Test fixtures: temporary on-disk and in-memory stores
//! - Sample record types used across the integration suites
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests and benches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use itemdb_testkit::prelude::*;
//!
//! #[test]
//! fn finds_ann() {
//!     with_temp_store(|store| {
//!         store.insert(Contact::new("Ann", "123")).unwrap();
//!         assert_eq!(store.count::<Contact>().unwrap(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod records;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::records::*;
}

pub use fixtures::*;
pub use generators::*;
pub use records::*;
