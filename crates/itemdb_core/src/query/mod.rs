//! Query builder.
//!
//! Queries are lazy and restartable: building one runs nothing, and every
//! call to [`Query::iter`] (or `all`, `count`, ...) compiles and executes it
//! afresh. Variants:
//!
//! - [`ItemQuery`]: items of one record type, routed through the object cache
//! - [`JoinQuery`]: tuples of items of several types related by a comparison
//! - [`AttributeQuery`]: values of one attribute, with SQL aggregates
//! - [`Distinct`]: `SELECT DISTINCT` over any of the above
//!
//! ```rust,ignore
//! let ann = store
//!     .query::<Contact>()
//!     .filter(Contact::column("name").eq("Ann"))
//!     .sort(Contact::column("number").ascending())
//!     .first()?;
//!
//! let total = store.query::<Order>().column("amount")?.sum()?;
//! ```

mod attribute;
mod base;
mod comparison;
mod distinct;
mod item;
mod join;
mod paginate;

pub use attribute::AttributeQuery;
pub use base::QueryBase;
pub use comparison::{Column, CompareOp, Comparison, Direction, SortKey};
pub use distinct::Distinct;
pub use item::ItemQuery;
pub use join::{JoinQuery, RecordSet};
pub use paginate::Paginate;

use crate::error::{StoreError, StoreResult};
use itemdb_storage::{Row, Value};

/// Behaviour shared by every query variant.
///
/// Implementors supply the select list and the row decoding; the provided
/// methods compile, run and decode.
pub trait Query: Clone {
    /// What each result row decodes to.
    type Output;

    #[doc(hidden)]
    fn base(&self) -> &QueryBase;

    #[doc(hidden)]
    fn base_mut(&mut self) -> &mut QueryBase;

    #[doc(hidden)]
    fn select_list(&self, db: &str) -> StoreResult<String>;

    #[doc(hidden)]
    fn massage(&self, row: Row) -> StoreResult<Self::Output>;

    #[doc(hidden)]
    fn verb(&self) -> &'static str {
        "SELECT"
    }

    /// Compiles the query to SQL and bound values.
    ///
    /// Registers the target types and creates missing tables first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for comparisons that leave a target or sort
    /// table unconstrained, and `StoreClosed` on a closed store.
    fn prepare(&self) -> StoreResult<(String, Vec<Value>)> {
        let base = self.base();
        base.store.ensure_open()?;
        let tables = base.tables()?;
        base.ensure_tables(&tables)?;
        let db = base.store.database_name();
        let mut args = Vec::new();
        let mut sql = format!("{} {}", self.verb(), self.select_list(&db)?);
        sql.push_str(&base.clauses(&db, &tables, &mut args));
        Ok((sql, args))
    }

    /// Lazily runs the query.
    ///
    /// Nothing executes until the first call to `next`.
    fn iter(&self) -> QueryIter<Self> {
        QueryIter {
            query: self.clone(),
            rows: None,
        }
    }

    /// Runs the query and collects every result.
    ///
    /// # Errors
    ///
    /// Returns the first compile, backend or decode error.
    fn all(&self) -> StoreResult<Vec<Self::Output>> {
        self.iter().collect()
    }

    /// Number of result rows, honouring limit and offset.
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare).
    fn count(&self) -> StoreResult<u64> {
        let (sql, args) = self.prepare()?;
        let sql = format!("SELECT COUNT(*) FROM ({sql})");
        let rows = self.base().store.run_query(&sql, &args)?;
        scalar(rows)
            .and_then(|v| v.as_integer())
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| StoreError::decode("COUNT returned no integer"))
    }

    /// Wraps the query in `SELECT DISTINCT`.
    fn distinct(self) -> Distinct<Self> {
        Distinct::new(self)
    }

    /// Returns at most `n` rows.
    #[must_use]
    fn limit(mut self, n: u64) -> Self {
        self.base_mut().limit = Some(n);
        self
    }

    /// Skips the first `n` rows.
    #[must_use]
    fn offset(mut self, n: u64) -> Self {
        self.base_mut().offset = Some(n);
        self
    }

    /// Copy of the query with a different limit.
    #[must_use]
    fn clone_query(&self, limit: Option<u64>) -> Self {
        let mut copy = self.clone();
        copy.base_mut().limit = limit;
        copy
    }

    /// The backend's query plan, one line per step.
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare).
    fn explain(&self) -> StoreResult<Vec<String>> {
        let (sql, args) = self.prepare()?;
        let rows = self
            .base()
            .store
            .run_query(&format!("EXPLAIN QUERY PLAN {sql}"), &args)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.last().and_then(Value::as_text).map(str::to_string))
            .collect())
    }
}

/// Lazy iterator over query results.
///
/// Runs the query on the first call to `next`; a failure is yielded once
/// and ends the iteration.
pub struct QueryIter<Q: Query> {
    query: Q,
    rows: Option<std::vec::IntoIter<Row>>,
}

impl<Q: Query> Iterator for QueryIter<Q> {
    type Item = StoreResult<Q::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rows.is_none() {
            let fetched = self
                .query
                .prepare()
                .and_then(|(sql, args)| self.query.base().store.run_query(&sql, &args));
            match fetched {
                Ok(rows) => self.rows = Some(rows.into_iter()),
                Err(err) => {
                    self.rows = Some(Vec::new().into_iter());
                    return Some(Err(err));
                }
            }
        }
        let row = self.rows.as_mut()?.next()?;
        Some(self.query.massage(row))
    }
}

impl<Q: Query> std::fmt::Debug for QueryIter<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryIter")
            .field("query", self.query.base())
            .field("started", &self.rows.is_some())
            .finish()
    }
}

/// First column of the first row.
pub(crate) fn scalar(rows: Vec<Row>) -> Option<Value> {
    rows.into_iter().next().and_then(|row| row.into_iter().next())
}
