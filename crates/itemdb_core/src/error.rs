//! Error types for ItemDB core.

use crate::types::StoreId;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Relational backend error.
    #[error("backend error: {0}")]
    Backend(#[from] itemdb_storage::BackendError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A lookup that requires a result found none.
    #[error("item not found: {description}")]
    ItemNotFound {
        /// What was looked for.
        description: String,
    },

    /// A unique lookup matched more than one row.
    #[error("duplicate unique item for {description}: {store_ids:?}")]
    DuplicateUniqueItem {
        /// The comparison that was expected to be unique.
        description: String,
        /// Store ids of the offending results.
        store_ids: Vec<StoreId>,
    },

    /// A stored row names a type this process has no declaration for.
    #[error("unknown item type {type_name} v{version} for store id {store_id}")]
    UnknownItemType {
        /// Stored type name.
        type_name: String,
        /// Stored schema version.
        version: u32,
        /// The row whose type is unknown.
        store_id: StoreId,
    },

    /// Code and database disagree about a type both claim to know.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the disagreement.
        message: String,
    },

    /// The upgrader chain for one or more old types has gaps.
    #[error("no upgrade path available: {}", missing.join("; "))]
    NoUpgradePathAvailable {
        /// Every missing link.
        missing: Vec<String>,
    },

    /// An item was mutated while a checkpoint or commit hook was running.
    #[error("change rejected: item mutation during checkpoint or commit hooks")]
    ChangeRejected,

    /// A reference policy forbids deleting the requested items.
    #[error("deletion disallowed: {message}")]
    DeletionDisallowed {
        /// Which reference blocked the delete.
        message: String,
    },

    /// `min`/`max` found no rows and no default was given.
    #[error("empty aggregate: {function} over no rows")]
    EmptyAggregate {
        /// The aggregate function.
        function: &'static str,
    },

    /// The store directory exists but cannot be used.
    #[error("store corrupt: {message}")]
    StoreCorrupt {
        /// What is wrong with it.
        message: String,
    },

    /// A record type declares no attributes.
    #[error("record type {type_name} has no attributes")]
    EmptyRecordType {
        /// Offending type.
        type_name: String,
    },

    /// A record type declaration is malformed.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// What is malformed.
        message: String,
    },

    /// A query cannot be compiled.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Why the query was rejected.
        message: String,
    },

    /// A value does not fit its attribute.
    #[error("invalid value for {type_name}.{attribute}: {message}")]
    InvalidValue {
        /// Record type.
        type_name: String,
        /// Attribute name.
        attribute: String,
        /// Why the value was rejected.
        message: String,
    },

    /// A row could not be decoded into a record.
    #[error("decode error: {message}")]
    Decode {
        /// What went wrong.
        message: String,
    },

    /// An upgrade step or the upgrade sequence failed.
    #[error("upgrade failed: {message}")]
    UpgradeFailed {
        /// What failed.
        message: String,
    },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the invalid operation.
        message: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl StoreError {
    /// Creates an item-not-found error.
    pub fn item_not_found(description: impl Into<String>) -> Self {
        Self::ItemNotFound {
            description: description.into(),
        }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates a deletion-disallowed error.
    pub fn deletion_disallowed(message: impl Into<String>) -> Self {
        Self::DeletionDisallowed {
            message: message.into(),
        }
    }

    /// Creates a store-corrupt error.
    pub fn store_corrupt(message: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an upgrade failure.
    pub fn upgrade_failed(message: impl Into<String>) -> Self {
        Self::UpgradeFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
