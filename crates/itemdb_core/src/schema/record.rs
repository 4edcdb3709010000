//! Record types and their schemas.

use super::attribute::Attribute;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::query::Column;
use crate::types::StoreId;
use itemdb_storage::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute values keyed by attribute name.
pub type AttributeValues = BTreeMap<String, Value>;

/// Identity of a record type: `(type name, schema version)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey {
    /// Type name.
    pub name: String,
    /// Schema version.
    pub version: u32,
}

impl TypeKey {
    /// Creates a new type key.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Backend table holding rows of this type and version.
    #[must_use]
    pub fn table_name(&self) -> String {
        format!("item_{}_v{}", self.name, self.version)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Static description of a stored entity.
///
/// Once a row exists under a `(type name, version)` pair, its attribute
/// list must not change; changing fields means bumping the version and
/// registering an upgrader.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    key: TypeKey,
    module: String,
    attributes: Vec<Attribute>,
    compound_indexes: Vec<Vec<String>>,
}

impl Schema {
    /// Creates a schema with no attributes.
    pub fn new(type_name: impl Into<String>, version: u32) -> Self {
        Self {
            key: TypeKey::new(type_name, version),
            module: String::new(),
            attributes: Vec::new(),
            compound_indexes: Vec::new(),
        }
    }

    /// Appends an attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Declares an index over several attributes.
    #[must_use]
    pub fn compound_index(mut self, attributes: &[&str]) -> Self {
        self.compound_indexes
            .push(attributes.iter().map(|a| (*a).to_string()).collect());
        self
    }

    /// Sets the module path recorded in the catalog.
    #[must_use]
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Type identity.
    #[must_use]
    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    /// Type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.key.name
    }

    /// Schema version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.key.version
    }

    /// Module path recorded in the catalog.
    #[must_use]
    pub fn module_path(&self) -> &str {
        &self.module
    }

    /// Attributes in column order.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Compound indexes.
    #[must_use]
    pub fn compound_indexes(&self) -> &[Vec<String>] {
        &self.compound_indexes
    }

    /// Column position of an attribute.
    #[must_use]
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name() == name)
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    /// Checks names, uniqueness and index declarations.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` describing the first problem found.
    pub fn validate(&self) -> StoreResult<()> {
        if !is_identifier(self.type_name()) {
            return Err(StoreError::invalid_schema(format!(
                "type name {:?} is not an identifier",
                self.type_name()
            )));
        }
        if self.version() == 0 {
            return Err(StoreError::invalid_schema(format!(
                "{}: schema versions start at 1",
                self.type_name()
            )));
        }
        for (idx, attr) in self.attributes.iter().enumerate() {
            if !is_identifier(attr.name()) {
                return Err(StoreError::invalid_schema(format!(
                    "{}: attribute name {:?} is not an identifier",
                    self.key,
                    attr.name()
                )));
            }
            if is_reserved(attr.name()) {
                return Err(StoreError::invalid_schema(format!(
                    "{}: attribute name {:?} is reserved",
                    self.key,
                    attr.name()
                )));
            }
            if self.attributes[..idx].iter().any(|a| a.name() == attr.name()) {
                return Err(StoreError::invalid_schema(format!(
                    "{}: duplicate attribute {:?}",
                    self.key,
                    attr.name()
                )));
            }
        }
        for index in &self.compound_indexes {
            if index.is_empty() {
                return Err(StoreError::invalid_schema(format!(
                    "{}: empty compound index",
                    self.key
                )));
            }
            if let Some(missing) = index.iter().find(|n| self.get_attribute(n).is_none()) {
                return Err(StoreError::invalid_schema(format!(
                    "{}: compound index names unknown attribute {missing:?}",
                    self.key
                )));
            }
        }
        Ok(())
    }

    /// `(sql type, name)` pairs compared against the catalog.
    pub(crate) fn identifying(&self) -> Vec<(String, String)> {
        self.attributes
            .iter()
            .map(|a| (a.sql_type().to_string(), a.name().to_string()))
            .collect()
    }

    /// Every attribute at its default.
    pub(crate) fn default_row(&self) -> Vec<Value> {
        self.attributes
            .iter()
            .map(|a| a.default_value().clone())
            .collect()
    }

    /// Builds a full row from named values, defaulting the rest.
    pub(crate) fn row_from_values(&self, values: AttributeValues) -> StoreResult<Vec<Value>> {
        let mut row = self.default_row();
        for (name, value) in values {
            let idx = self.attribute_index(&name).ok_or_else(|| {
                StoreError::invalid_query(format!("{} has no attribute {name:?}", self.key))
            })?;
            row[idx] = value;
        }
        Ok(row)
    }

    /// Names a row's values.
    pub(crate) fn values_by_name(&self, row: &[Value]) -> AttributeValues {
        self.attributes
            .iter()
            .zip(row)
            .map(|(a, v)| (a.name().to_string(), v.clone()))
            .collect()
    }

    /// Validates a row about to be written.
    pub(crate) fn check_row(&self, row: &[Value]) -> StoreResult<()> {
        if row.len() != self.attributes.len() {
            return Err(StoreError::InvalidValue {
                type_name: self.type_name().to_string(),
                attribute: String::new(),
                message: format!(
                    "expected {} values, got {}",
                    self.attributes.len(),
                    row.len()
                ),
            });
        }
        for (attr, value) in self.attributes.iter().zip(row) {
            attr.check(self.type_name(), value)?;
        }
        Ok(())
    }

    /// Converts raw column values into their in-memory forms.
    pub(crate) fn decode_row(&self, raw: Vec<Value>) -> Vec<Value> {
        self.attributes
            .iter()
            .zip(raw)
            .map(|(attr, value)| attr.kind().from_sql(value))
            .collect()
    }
}

/// A schema tagged with whether it is the type's most recent version.
#[derive(Debug, Clone)]
pub enum RecordVersion {
    /// The version application code reads and writes.
    Current(Arc<Schema>),
    /// An older version, only ever seen by the upgrade engine.
    Legacy(Arc<Schema>),
}

impl RecordVersion {
    /// The wrapped schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        match self {
            Self::Current(schema) | Self::Legacy(schema) => schema,
        }
    }

    /// Returns true for legacy versions.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

/// Trait for application types stored as items.
///
/// Implementors provide:
/// - `TYPE_NAME`/`SCHEMA_VERSION`: the type's catalog identity
/// - `schema()`: the column descriptors, in `encode` order
/// - `encode()`/`decode()`: conversion to and from one row of values
///
/// # Example
///
/// ```rust,ignore
/// use itemdb_core::{Attribute, Fields, Record, Schema, StoreResult, Value};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Contact {
///     name: String,
///     number: String,
/// }
///
/// impl Record for Contact {
///     const TYPE_NAME: &'static str = "contact";
///
///     fn schema() -> Schema {
///         Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
///             .attribute(Attribute::text("name").indexed())
///             .attribute(Attribute::text("number"))
///     }
///
///     fn encode(&self) -> Vec<Value> {
///         vec![self.name.clone().into(), self.number.clone().into()]
///     }
///
///     fn decode(values: &[Value]) -> StoreResult<Self> {
///         let mut fields = Fields::new(values);
///         Ok(Self {
///             name: fields.text()?,
///             number: fields.text()?,
///         })
///     }
/// }
/// ```
pub trait Record: Clone + Send + Sync + Sized + 'static {
    /// Type name; also the stem of the backing table name.
    const TYPE_NAME: &'static str;

    /// Schema version; bump it whenever the attribute list changes.
    const SCHEMA_VERSION: u32 = 1;

    /// Set when `deleted` must run for every deleted item.
    ///
    /// Bulk deletes of types without it skip per-item loading.
    const CUSTOM_DELETION: bool = false;

    /// Column descriptors, in the order `encode` produces values.
    fn schema() -> Schema;

    /// Produces one value per attribute.
    fn encode(&self) -> Vec<Value>;

    /// Rebuilds a record from one value per attribute.
    ///
    /// # Errors
    ///
    /// Returns a decode error if a value has the wrong shape.
    fn decode(values: &[Value]) -> StoreResult<Self>;

    /// Called after an item's rows are removed.
    fn deleted(_item: &Item<Self>) {}

    /// Called after a transaction that touched the item commits.
    fn committed(_item: &Item<Self>) {}

    /// Called after a transaction that touched the item rolls back.
    fn reverted(_item: &Item<Self>) {}

    /// Column reference for comparisons and sorts.
    fn column(name: &str) -> Column {
        Column::attribute(TypeKey::new(Self::TYPE_NAME, Self::SCHEMA_VERSION), name)
    }

    /// The store id column.
    fn store_id_column() -> Column {
        Column::store_id(TypeKey::new(Self::TYPE_NAME, Self::SCHEMA_VERSION))
    }
}

/// Sequential reader over a row, for `decode` implementations.
#[derive(Debug)]
pub struct Fields<'a> {
    values: &'a [Value],
    pos: usize,
}

impl<'a> Fields<'a> {
    /// Starts reading at the first value.
    #[must_use]
    pub fn new(values: &'a [Value]) -> Self {
        Self { values, pos: 0 }
    }

    /// Next raw value.
    ///
    /// # Errors
    ///
    /// Returns a decode error when the row is exhausted.
    pub fn value(&mut self) -> StoreResult<Value> {
        let value = self
            .values
            .get(self.pos)
            .cloned()
            .ok_or_else(|| StoreError::decode(format!("row has no column {}", self.pos)))?;
        self.pos += 1;
        Ok(value)
    }

    fn mismatch(&self, expected: &str, got: &Value) -> StoreError {
        StoreError::decode(format!(
            "column {}: expected {expected}, got {}",
            self.pos - 1,
            got.type_name()
        ))
    }

    /// Next value as text.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is not text.
    pub fn text(&mut self) -> StoreResult<String> {
        self.opt_text()?
            .ok_or_else(|| StoreError::decode(format!("column {}: unexpected null", self.pos - 1)))
    }

    /// Next value as optional text.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is neither text nor null.
    pub fn opt_text(&mut self) -> StoreResult<Option<String>> {
        match self.value()? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            other => Err(self.mismatch("text", &other)),
        }
    }

    /// Next value as an integer.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is not an integer.
    pub fn integer(&mut self) -> StoreResult<i64> {
        self.opt_integer()?
            .ok_or_else(|| StoreError::decode(format!("column {}: unexpected null", self.pos - 1)))
    }

    /// Next value as an optional integer.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is neither an integer nor null.
    pub fn opt_integer(&mut self) -> StoreResult<Option<i64>> {
        match self.value()? {
            Value::Null => Ok(None),
            Value::Integer(n) => Ok(Some(n)),
            other => Err(self.mismatch("integer", &other)),
        }
    }

    /// Next value as a double.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is not numeric.
    pub fn real(&mut self) -> StoreResult<f64> {
        self.opt_real()?
            .ok_or_else(|| StoreError::decode(format!("column {}: unexpected null", self.pos - 1)))
    }

    /// Next value as an optional double.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is neither numeric nor null.
    pub fn opt_real(&mut self) -> StoreResult<Option<f64>> {
        match self.value()? {
            Value::Null => Ok(None),
            other => match other.as_real() {
                Some(f) => Ok(Some(f)),
                None => Err(self.mismatch("real", &other)),
            },
        }
    }

    /// Next value as a boolean.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is not a boolean.
    pub fn boolean(&mut self) -> StoreResult<bool> {
        match self.value()? {
            Value::Bool(b) => Ok(b),
            Value::Integer(n) => Ok(n != 0),
            other => Err(self.mismatch("boolean", &other)),
        }
    }

    /// Next value as bytes.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is not a byte string.
    pub fn bytes(&mut self) -> StoreResult<Vec<u8>> {
        match self.value()? {
            Value::Bytes(b) => Ok(b),
            other => Err(self.mismatch("bytes", &other)),
        }
    }

    /// Next value as an optional reference.
    ///
    /// # Errors
    ///
    /// Returns a decode error if it is neither an integer nor null.
    pub fn reference(&mut self) -> StoreResult<Option<StoreId>> {
        Ok(self.opt_integer()?.map(StoreId::new))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_reserved(name: &str) -> bool {
    name.eq_ignore_ascii_case("oid") || name.eq_ignore_ascii_case("storeid")
}
