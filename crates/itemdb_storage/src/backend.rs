//! Relational backend trait definition.

use crate::error::BackendResult;
use crate::value::Value;
use std::path::Path;

/// One result row, in select-list order.
pub type Row = Vec<Value>;

/// A relational engine that ItemDB can keep its tables in.
///
/// The backend is owned by exactly one store (attached child stores borrow
/// their parent's). Only the transaction bookkeeping in the store calls
/// [`begin_immediate`](Self::begin_immediate), [`commit`](Self::commit) and
/// [`rollback`](Self::rollback); every other statement runs inside whatever
/// transaction is ambient.
///
/// # Invariants
///
/// - `query` returns every row of the statement; nothing is streamed lazily
/// - `last_insert_id` reports the row id of the most recent successful `INSERT`
/// - "already exists" failures of `CREATE TABLE`/`CREATE INDEX` surface as
///   [`BackendError::TableAlreadyExists`](crate::BackendError::TableAlreadyExists)
///   and [`BackendError::IndexAlreadyExists`](crate::BackendError::IndexAlreadyExists)
///
/// # Implementors
///
/// - [`super::SqliteBackend`] - bundled SQLite, on disk or in memory
pub trait RelationalBackend: Send {
    /// Runs a statement that produces rows and returns all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails to prepare or execute.
    fn query(&mut self, sql: &str, args: &[Value]) -> BackendResult<Vec<Row>>;

    /// Runs a statement that produces no rows.
    ///
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails to prepare or execute.
    fn execute(&mut self, sql: &str, args: &[Value]) -> BackendResult<usize>;

    /// Row id assigned by the most recent `INSERT`.
    fn last_insert_id(&self) -> i64;

    /// Starts a transaction that takes the write lock immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open or the lock
    /// cannot be acquired within the busy timeout.
    fn begin_immediate(&mut self) -> BackendResult<()>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    fn commit(&mut self) -> BackendResult<()>;

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&mut self) -> BackendResult<()>;

    /// Returns true while an explicit transaction is open.
    fn in_transaction(&self) -> bool;

    /// Attaches another database file under `name`.
    ///
    /// The path is spliced into the statement as a literal.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be attached.
    fn attach(&mut self, path: &Path, name: &str) -> BackendResult<()>;
}
