//! Single-attribute projections and aggregates.

use super::base::QueryBase;
use super::comparison::{Column, Comparison, SortKey};
use super::{scalar, Query};
use crate::error::{StoreError, StoreResult};
use crate::schema::{AttributeKind, Record};
use itemdb_storage::{Row, Value};
use std::marker::PhantomData;

/// Values of one attribute of `T`, without building items.
///
/// Aggregates run as one SQL pass over the projected rows.
pub struct AttributeQuery<T: Record> {
    base: QueryBase,
    attribute: String,
    kind: AttributeKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for AttributeQuery<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            attribute: self.attribute.clone(),
            kind: self.kind.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> AttributeQuery<T> {
    pub(crate) fn new(base: QueryBase, attribute: String, kind: AttributeKind) -> Self {
        Self {
            base,
            attribute,
            kind,
            _marker: PhantomData,
        }
    }

    /// The projected column.
    #[must_use]
    pub fn column(&self) -> Column {
        T::column(&self.attribute)
    }

    /// Adds a comparison, ANDed with any existing one.
    #[must_use]
    pub fn filter(mut self, comparison: Comparison) -> Self {
        self.base.filter(comparison);
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn sort(mut self, key: SortKey) -> Self {
        self.base.sort.push(key);
        self
    }

    fn aggregate(&self, function: &str) -> StoreResult<Value> {
        let (sql, args) = self.prepare()?;
        let sql = format!("SELECT {function}(value) FROM ({sql})");
        let rows = self.base.store.run_query(&sql, &args)?;
        Ok(scalar(rows).unwrap_or(Value::Null))
    }

    /// Sum of the non-null values; zero over no rows.
    ///
    /// # Errors
    ///
    /// Returns compile or backend errors.
    pub fn sum(&self) -> StoreResult<Value> {
        match self.aggregate("SUM")? {
            Value::Null => Ok(Value::Integer(0)),
            total => Ok(total),
        }
    }

    /// Mean of the non-null values, `None` over no rows.
    ///
    /// # Errors
    ///
    /// Returns compile or backend errors.
    pub fn average(&self) -> StoreResult<Option<f64>> {
        Ok(self.aggregate("AVG")?.as_real())
    }

    /// Smallest value.
    ///
    /// # Errors
    ///
    /// Returns `EmptyAggregate` when there are no non-null values.
    pub fn min(&self) -> StoreResult<Value> {
        self.extreme("MIN", "min")
    }

    /// Largest value.
    ///
    /// # Errors
    ///
    /// Returns `EmptyAggregate` when there are no non-null values.
    pub fn max(&self) -> StoreResult<Value> {
        self.extreme("MAX", "max")
    }

    /// Smallest value, or `default` over no rows.
    ///
    /// # Errors
    ///
    /// Returns compile or backend errors.
    pub fn min_or(&self, default: impl Into<Value>) -> StoreResult<Value> {
        match self.min() {
            Err(StoreError::EmptyAggregate { .. }) => Ok(default.into()),
            other => other,
        }
    }

    /// Largest value, or `default` over no rows.
    ///
    /// # Errors
    ///
    /// Returns compile or backend errors.
    pub fn max_or(&self, default: impl Into<Value>) -> StoreResult<Value> {
        match self.max() {
            Err(StoreError::EmptyAggregate { .. }) => Ok(default.into()),
            other => other,
        }
    }

    fn extreme(&self, sql_function: &str, function: &'static str) -> StoreResult<Value> {
        match self.aggregate(sql_function)? {
            Value::Null => Err(StoreError::EmptyAggregate { function }),
            value => Ok(self.kind.from_sql(value)),
        }
    }
}

impl<T: Record> Query for AttributeQuery<T> {
    type Output = Value;

    fn base(&self) -> &QueryBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut QueryBase {
        &mut self.base
    }

    fn select_list(&self, db: &str) -> StoreResult<String> {
        Ok(format!("{} AS value", self.column().to_sql(db)))
    }

    fn massage(&self, row: Row) -> StoreResult<Value> {
        let value = row
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::decode("empty projection row"))?;
        Ok(self.kind.from_sql(value))
    }

    /// Number of non-null values.
    fn count(&self) -> StoreResult<u64> {
        self.aggregate("COUNT")?
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| StoreError::decode("COUNT returned no integer"))
    }
}

impl<T: Record> std::fmt::Debug for AttributeQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeQuery")
            .field("attribute", &self.attribute)
            .field("base", &self.base)
            .finish()
    }
}
