//! # ItemDB Storage
//!
//! Relational backend contract and its SQLite implementation.
//!
//! ItemDB keeps every catalog and item table in an embedded SQL engine.
//! This crate is the only place that talks to that engine. It knows
//! nothing about record types, caches, or upgrades; it runs parameterized
//! statements and hands back rows of [`Value`]s.
//!
//! ## Contract
//!
//! A compliant backend supports:
//! - parameterized `SELECT`/`INSERT`/`UPDATE`/`DELETE`
//! - `CREATE TABLE`/`CREATE INDEX`, reporting "already exists" distinctly
//! - `BEGIN IMMEDIATE`/`COMMIT`/`ROLLBACK`
//! - `ATTACH DATABASE '<path>' AS <name>` with a literal path
//! - reading the row id of the last `INSERT`
//!
//! ## Example
//!
//! ```rust
//! use itemdb_storage::{RelationalBackend, SqliteBackend, Value};
//!
//! let mut backend = SqliteBackend::open_in_memory().unwrap();
//! backend.execute("CREATE TABLE t (oid INTEGER PRIMARY KEY, name TEXT)", &[]).unwrap();
//! backend.execute("INSERT INTO t (name) VALUES (?)", &[Value::from("ann")]).unwrap();
//! assert_eq!(backend.last_insert_id(), 1);
//! let rows = backend.query("SELECT name FROM t", &[]).unwrap();
//! assert_eq!(rows[0][0], Value::from("ann"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod sqlite;
mod value;

pub use backend::{RelationalBackend, Row};
pub use error::{BackendError, BackendResult};
pub use sqlite::{normalize_sql, SqliteBackend};
pub use value::Value;
