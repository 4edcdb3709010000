//! Core type definitions for ItemDB.

use itemdb_storage::Value;
use std::fmt;

/// Row identifier of an item, unique within one store.
///
/// Assigned by the backend when the item is first inserted. The sentinel
/// [`StoreId::STORE`] denotes the store itself, so a reference attribute can
/// point at the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub i64);

impl StoreId {
    /// The store itself.
    pub const STORE: StoreId = StoreId(-1);

    /// Creates a new store ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true for the sentinel that denotes the store.
    #[must_use]
    pub const fn is_store(self) -> bool {
        self.0 == Self::STORE.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for StoreId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<StoreId> for Value {
    fn from(id: StoreId) -> Self {
        Value::Integer(id.0)
    }
}

/// Catalog identifier of a `(type name, schema version)` pair.
///
/// Opaque and stable for the life of the database; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub i64);

impl TypeId {
    /// Creates a new type ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type:{}", self.0)
    }
}

impl From<TypeId> for Value {
    fn from(id: TypeId) -> Self {
        Value::Integer(id.0)
    }
}
