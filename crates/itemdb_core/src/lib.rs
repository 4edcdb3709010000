//! # ItemDB Core
//!
//! Transactional typed object store on top of a relational backend.
//!
//! This crate provides:
//! - A versioned schema catalog mapping record types to tables
//! - In-place upgrades of rows written by older schema versions
//! - An identity-preserving object cache
//! - Transactions with checkpoints, commit and rollback notifications
//! - A query builder with filtering, sorting, pagination, aggregates and joins
//!
//! ## Example
//!
//! ```rust,ignore
//! use itemdb_core::{Attribute, Fields, Record, Schema, Store, StoreResult, Value};
//!
//! #[derive(Debug, Clone)]
//! struct Contact {
//!     name: String,
//!     number: String,
//! }
//!
//! impl Record for Contact {
//!     const TYPE_NAME: &'static str = "contact";
//!
//!     fn schema() -> Schema {
//!         Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
//!             .attribute(Attribute::text("name").indexed())
//!             .attribute(Attribute::text("number"))
//!     }
//!
//!     fn encode(&self) -> Vec<Value> {
//!         vec![self.name.clone().into(), self.number.clone().into()]
//!     }
//!
//!     fn decode(values: &[Value]) -> StoreResult<Self> {
//!         let mut fields = Fields::new(values);
//!         Ok(Self { name: fields.text()?, number: fields.text()? })
//!     }
//! }
//!
//! let store = Store::open_in_memory()?;
//! let ann = store.find_or_create::<Contact>(&[("name", "Ann".into()), ("number", "123".into())])?;
//! assert_eq!(store.query::<Contact>().filter(Contact::column("name").eq("Ann")).count()?, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod catalog;
mod config;
mod dir;
mod error;
mod item;
mod query;
mod registry;
mod schema;
mod stats;
mod store;
mod transaction;
mod types;
mod upgrade;

pub use config::{Config, Location, UpgradeMode};
pub use dir::AtomicFile;
pub use error::{StoreError, StoreResult};
pub use item::{Item, ItemStatus};
pub use query::{
    AttributeQuery, Column, CompareOp, Comparison, Direction, Distinct, ItemQuery, JoinQuery,
    Paginate, Query, QueryIter, RecordSet, SortKey,
};
pub use registry::Registry;
pub use schema::{
    Attribute, AttributeKind, AttributeValues, DeletePolicy, Fields, Record, RecordVersion, Schema,
    TypeKey,
};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::Store;
pub use types::{StoreId, TypeId};
pub use upgrade::{LegacyItem, UpgradeCompletion, UpgradeFn, Upgraded, Upgrader};

pub use itemdb_storage::Value;
