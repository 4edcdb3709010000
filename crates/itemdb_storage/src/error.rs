//! Error types for backend operations.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur while talking to the relational backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// `CREATE TABLE` failed because the table is already present.
    ///
    /// Another process sharing the database usually won the race.
    #[error("table already exists: {table}")]
    TableAlreadyExists {
        /// Table name reported by the engine.
        table: String,
    },

    /// `CREATE INDEX` failed because the index is already present.
    #[error("index already exists: {index}")]
    IndexAlreadyExists {
        /// Index name reported by the engine.
        index: String,
    },

    /// The file exists but does not hold a database.
    #[error("file is not a database: {0}")]
    NotADatabase(String),

    /// The database is locked by another connection and the busy timeout expired.
    #[error("database is busy: {0}")]
    Busy(String),

    /// Any other engine failure.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        // Prepare failures carry the statement offset in a separate variant.
        let (code, message) = match &err {
            rusqlite::Error::SqliteFailure(code, message) => {
                (code.code, message.clone().unwrap_or_default())
            }
            rusqlite::Error::SqlInputError { error, msg, .. } => (error.code, msg.clone()),
            _ => return Self::Sqlite(err),
        };
        classify(code, message).unwrap_or(Self::Sqlite(err))
    }
}

fn classify(code: rusqlite::ErrorCode, message: String) -> Option<BackendError> {
    use rusqlite::ErrorCode;

    match code {
        ErrorCode::NotADatabase => return Some(BackendError::NotADatabase(message)),
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
            return Some(BackendError::Busy(message))
        }
        _ => {}
    }
    if let Some(name) = already_exists(&message, "table") {
        return Some(BackendError::TableAlreadyExists { table: name });
    }
    already_exists(&message, "index").map(|name| BackendError::IndexAlreadyExists { index: name })
}

/// Parses messages of the form `<kind> <name> already exists`.
fn already_exists(message: &str, kind: &str) -> Option<String> {
    let rest = message.strip_prefix(kind)?.strip_suffix("already exists")?;
    let name = rest.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
