//! SQLite backend over `rusqlite`.

use crate::backend::{RelationalBackend, Row};
use crate::error::{BackendError, BackendResult};
use crate::value::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Default threshold above which a statement is logged as slow.
const DEFAULT_SLOW_STATEMENT: Duration = Duration::from_secs(2);

/// Prepared statements kept per connection.
const STATEMENT_CACHE_CAPACITY: usize = 64;

/// A [`RelationalBackend`] backed by bundled SQLite.
///
/// Either a file on disk or a private in-memory database. Several processes
/// may open the same file; SQLite's own locking serializes their writers and
/// [`with_busy_timeout`](Self::with_busy_timeout) bounds how long a writer
/// waits for the lock.
pub struct SqliteBackend {
    conn: Connection,
    path: Option<PathBuf>,
    slow_statement: Duration,
}

impl SqliteBackend {
    /// Opens (creating if needed) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a database.
    pub fn open(path: &Path) -> BackendResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Opens an existing database file without creating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or is not a database.
    pub fn open_existing(path: &Path) -> BackendResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> BackendResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> BackendResult<Self> {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        let backend = Self {
            conn,
            path,
            slow_statement: DEFAULT_SLOW_STATEMENT,
        };
        // SQLite opens lazily; touch the schema so a garbage file fails here.
        backend
            .conn
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })?;
        Ok(backend)
    }

    /// Sets how long a statement waits on another connection's lock.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite rejects the timeout.
    pub fn with_busy_timeout(self, timeout: Duration) -> BackendResult<Self> {
        self.conn.busy_timeout(timeout)?;
        Ok(self)
    }

    /// Sets the threshold above which statements are logged as slow.
    #[must_use]
    pub fn with_slow_statement_threshold(mut self, threshold: Duration) -> Self {
        self.slow_statement = threshold;
        self
    }

    /// Path of the database file, if on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn log_statement(&self, sql: &str, elapsed: Duration) {
        if elapsed > self.slow_statement {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "slow statement: {}",
                normalize_sql(sql)
            );
        } else {
            trace!(elapsed_us = elapsed.as_micros() as u64, "{}", normalize_sql(sql));
        }
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

impl RelationalBackend for SqliteBackend {
    fn query(&mut self, sql: &str, args: &[Value]) -> BackendResult<Vec<Row>> {
        let started = Instant::now();
        let rows = {
            let mut stmt = self.conn.prepare_cached(sql)?;
            let columns = stmt.column_count();
            let mut cursor = stmt.query(params_from_iter(args.iter()))?;
            let mut rows = Vec::new();
            while let Some(row) = cursor.next()? {
                let mut values = Vec::with_capacity(columns);
                for idx in 0..columns {
                    values.push(row.get::<_, Value>(idx)?);
                }
                rows.push(values);
            }
            rows
        };
        self.log_statement(sql, started.elapsed());
        Ok(rows)
    }

    fn execute(&mut self, sql: &str, args: &[Value]) -> BackendResult<usize> {
        let started = Instant::now();
        let changed = {
            let mut stmt = self.conn.prepare_cached(sql)?;
            stmt.execute(params_from_iter(args.iter()))?
        };
        self.log_statement(sql, started.elapsed());
        Ok(changed)
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn begin_immediate(&mut self) -> BackendResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION")?;
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> BackendResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn attach(&mut self, path: &Path, name: &str) -> BackendResult<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid attachment name: {name:?}"),
            )));
        }
        let literal = path.to_string_lossy().replace('\'', "''");
        self.conn
            .execute_batch(&format!("ATTACH DATABASE '{literal}' AS {name}"))?;
        Ok(())
    }
}

/// Collapses runs of whitespace so multi-line SQL logs on one line.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
