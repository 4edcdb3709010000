//! Attribute descriptors.

use crate::error::{StoreError, StoreResult};
use itemdb_storage::Value;

/// What happens to a referencing item when its target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// The reference is set to null.
    #[default]
    Nullify,
    /// The referencing item is deleted too.
    Cascade,
    /// The delete fails with `DeletionDisallowed`.
    Disallow,
}

/// Semantic type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    /// Signed 64-bit integer.
    Integer,
    /// IEEE-754 double.
    Real,
    /// UTF-8 text.
    Text,
    /// Byte string.
    Bytes,
    /// Boolean.
    Boolean,
    /// Microseconds since the Unix epoch.
    Timestamp,
    /// Store id of another item (or of the store).
    Reference {
        /// Behavior when the referenced item is deleted.
        policy: DeletePolicy,
        /// Restricts the check to one target type name.
        target: Option<String>,
    },
}

impl AttributeKind {
    /// SQL column type.
    #[must_use]
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer | Self::Timestamp | Self::Reference { .. } => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Bytes => "BLOB",
            Self::Boolean => "BOOLEAN",
        }
    }

    /// Name persisted in the catalog so the kind can be rebuilt later.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Reference { .. } => "reference",
        }
    }

    /// Rebuilds a kind from its catalog name.
    ///
    /// Reference policies are not persisted; rebuilt references nullify.
    #[must_use]
    pub fn from_kind_name(name: &str) -> Option<Self> {
        Some(match name {
            "integer" => Self::Integer,
            "real" => Self::Real,
            "text" => Self::Text,
            "bytes" => Self::Bytes,
            "boolean" => Self::Boolean,
            "timestamp" => Self::Timestamp,
            "reference" => Self::Reference {
                policy: DeletePolicy::Nullify,
                target: None,
            },
            _ => return None,
        })
    }

    /// Returns true if a non-null value belongs to this kind's domain.
    pub(crate) fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Integer | Self::Timestamp | Self::Reference { .. }, Value::Integer(_)) => true,
            (Self::Real, Value::Real(_) | Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Bytes, Value::Bytes(_)) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }

    /// Converts a raw column value into this kind's in-memory form.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn from_sql(&self, raw: Value) -> Value {
        match (self, raw) {
            (Self::Boolean, Value::Integer(n)) => Value::Bool(n != 0),
            (Self::Real, Value::Integer(n)) => Value::Real(n as f64),
            (_, other) => other,
        }
    }
}

/// One column of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    kind: AttributeKind,
    indexed: bool,
    allow_none: bool,
    default: Value,
    doc: String,
}

impl Attribute {
    /// Creates a nullable, unindexed attribute with a null default.
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            indexed: false,
            allow_none: true,
            default: Value::Null,
            doc: String::new(),
        }
    }

    /// Integer attribute.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Integer)
    }

    /// Double attribute.
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Real)
    }

    /// Text attribute.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Text)
    }

    /// Bytes attribute.
    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Bytes)
    }

    /// Boolean attribute.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Boolean)
    }

    /// Timestamp attribute.
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Timestamp)
    }

    /// Reference attribute that nullifies when its target is deleted.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(
            name,
            AttributeKind::Reference {
                policy: DeletePolicy::Nullify,
                target: None,
            },
        )
    }

    /// Marks the attribute as indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Disallows null values.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.allow_none = false;
        self
    }

    /// Sets the default used when a row is built from partial values.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Sets the docstring.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Sets the delete policy of a reference attribute.
    ///
    /// No effect on other kinds.
    #[must_use]
    pub fn when_deleted(mut self, policy: DeletePolicy) -> Self {
        if let AttributeKind::Reference { policy: p, .. } = &mut self.kind {
            *p = policy;
        }
        self
    }

    /// Restricts a reference attribute to one target type.
    #[must_use]
    pub fn target(mut self, type_name: impl Into<String>) -> Self {
        if let AttributeKind::Reference { target, .. } = &mut self.kind {
            *target = Some(type_name.into());
        }
        self
    }

    /// Attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Semantic kind.
    #[must_use]
    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    /// SQL column type.
    #[must_use]
    pub fn sql_type(&self) -> &'static str {
        self.kind.sql_type()
    }

    /// Whether an index is created for this column.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Whether null is a legal value.
    #[must_use]
    pub fn allows_none(&self) -> bool {
        self.allow_none
    }

    /// Default value.
    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Docstring.
    #[must_use]
    pub fn docstring(&self) -> &str {
        &self.doc
    }

    /// Delete policy, for reference attributes.
    #[must_use]
    pub fn delete_policy(&self) -> Option<DeletePolicy> {
        match &self.kind {
            AttributeKind::Reference { policy, .. } => Some(*policy),
            _ => None,
        }
    }

    /// Returns true if this reference may point at items of `type_name`.
    pub(crate) fn may_reference(&self, type_name: &str) -> bool {
        match &self.kind {
            AttributeKind::Reference { target, .. } => {
                target.as_deref().map_or(true, |t| t == type_name)
            }
            _ => false,
        }
    }

    /// Rebuilds an attribute from catalog metadata.
    pub(crate) fn from_catalog(
        name: String,
        kind: AttributeKind,
        indexed: bool,
        allow_none: bool,
        doc: String,
    ) -> Self {
        Self {
            name,
            kind,
            indexed,
            allow_none,
            default: Value::Null,
            doc,
        }
    }

    /// Validates a value against kind and nullability.
    pub(crate) fn check(&self, type_name: &str, value: &Value) -> StoreResult<()> {
        let message = if value.is_null() {
            if self.allow_none {
                return Ok(());
            }
            "null is not allowed".to_string()
        } else if self.kind.accepts(value) {
            return Ok(());
        } else {
            format!(
                "{} value does not fit a {} attribute",
                value.type_name(),
                self.kind.kind_name()
            )
        };
        Err(StoreError::InvalidValue {
            type_name: type_name.to_string(),
            attribute: self.name.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            AttributeKind::Integer,
            AttributeKind::Real,
            AttributeKind::Text,
            AttributeKind::Bytes,
            AttributeKind::Boolean,
            AttributeKind::Timestamp,
        ] {
            assert_eq!(AttributeKind::from_kind_name(kind.kind_name()), Some(kind));
        }
        assert!(matches!(
            AttributeKind::from_kind_name("reference"),
            Some(AttributeKind::Reference { .. })
        ));
        assert_eq!(AttributeKind::from_kind_name("widget"), None);
    }

    #[test]
    fn nullability_is_checked() {
        let attr = Attribute::text("name").not_null();
        assert!(attr.check("contact", &Value::from("ann")).is_ok());
        let err = attr.check("contact", &Value::Null).unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { ref attribute, .. } if attribute == "name"));
    }

    #[test]
    fn domains_are_checked() {
        assert!(Attribute::real("x").check("t", &Value::Integer(1)).is_ok());
        assert!(Attribute::integer("x").check("t", &Value::Real(1.0)).is_err());
        assert!(Attribute::boolean("x").check("t", &Value::Bool(true)).is_ok());
        assert!(Attribute::bytes("x").check("t", &Value::from("s")).is_err());
    }

    #[test]
    fn booleans_come_back_from_integers() {
        assert_eq!(AttributeKind::Boolean.from_sql(Value::Integer(1)), Value::Bool(true));
        assert_eq!(AttributeKind::Real.from_sql(Value::Integer(2)), Value::Real(2.0));
        assert_eq!(AttributeKind::Text.from_sql(Value::Null), Value::Null);
    }

    #[test]
    fn reference_builders() {
        let attr = Attribute::reference("owner")
            .when_deleted(DeletePolicy::Cascade)
            .target("person");
        assert_eq!(attr.delete_policy(), Some(DeletePolicy::Cascade));
        assert!(attr.may_reference("person"));
        assert!(!attr.may_reference("contact"));
        assert_eq!(attr.sql_type(), "INTEGER");
        assert_eq!(Attribute::text("t").delete_policy(), None);
    }
}
