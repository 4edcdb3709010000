//! Clauses shared by every query variant.

use super::comparison::{Comparison, SortKey};
use crate::catalog::quote;
use crate::error::{StoreError, StoreResult};
use crate::registry::{ops_for, TypeOps};
use crate::schema::{Record, Schema, TypeKey};
use crate::store::Store;
use itemdb_storage::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One record type a query returns.
#[doc(hidden)]
#[derive(Clone)]
pub struct QueryTarget {
    pub(crate) key: TypeKey,
    pub(crate) ops: Arc<dyn TypeOps>,
}

impl QueryTarget {
    pub(crate) fn of<T: Record>() -> Self {
        Self {
            key: TypeKey::new(T::TYPE_NAME, T::SCHEMA_VERSION),
            ops: ops_for::<T>(),
        }
    }
}

/// Target types, WHERE, ORDER BY, LIMIT and OFFSET of a query.
#[doc(hidden)]
#[derive(Clone)]
pub struct QueryBase {
    pub(crate) store: Store,
    pub(crate) targets: Vec<QueryTarget>,
    pub(crate) comparison: Option<Comparison>,
    pub(crate) sort: Vec<SortKey>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl QueryBase {
    pub(crate) fn new(store: Store, targets: Vec<QueryTarget>) -> Self {
        Self {
            store,
            targets,
            comparison: None,
            sort: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// ANDs `comparison` onto the WHERE clause.
    pub(crate) fn filter(&mut self, comparison: Comparison) {
        self.comparison = Some(match self.comparison.take() {
            Some(existing) => existing.and(comparison),
            None => comparison,
        });
    }

    /// Tables of the FROM clause.
    ///
    /// A comparison decides them; every target and sort column must be
    /// among them so no table joins unconstrained.
    pub(crate) fn tables(&self) -> StoreResult<Vec<TypeKey>> {
        let tables: BTreeSet<TypeKey> = match &self.comparison {
            Some(comparison) => comparison.tables(),
            None if self.targets.len() == 1 => self.targets.iter().map(|t| t.key.clone()).collect(),
            None => {
                return Err(StoreError::invalid_query(
                    "a query over several types needs a comparison relating them",
                ))
            }
        };
        for target in &self.targets {
            if !tables.contains(&target.key) {
                return Err(StoreError::invalid_query(format!(
                    "comparison omits required reference to result type {}",
                    target.key
                )));
            }
        }
        for key in &self.sort {
            if !tables.contains(key.column().table()) {
                return Err(StoreError::invalid_query(format!(
                    "sort column of {} is not part of the query",
                    key.column().table()
                )));
            }
        }
        Ok(tables.into_iter().collect())
    }

    /// Registers the targets and creates any missing tables.
    pub(crate) fn ensure_tables(&self, tables: &[TypeKey]) -> StoreResult<()> {
        for target in &self.targets {
            target.ops.register(&self.store)?;
        }
        for key in tables {
            self.store.ensure_table(key)?;
        }
        Ok(())
    }

    /// Renders `FROM ... WHERE ... ORDER BY ... LIMIT ...`.
    pub(crate) fn clauses(&self, db: &str, tables: &[TypeKey], args: &mut Vec<Value>) -> String {
        let from = tables
            .iter()
            .map(|key| format!("{db}.{}", key.table_name()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(" FROM {from}");
        if let Some(comparison) = &self.comparison {
            sql.push_str(" WHERE ");
            comparison.to_sql(db, &mut sql, args);
        }
        if !self.sort.is_empty() {
            let order = self
                .sort
                .iter()
                .map(|key| key.to_sql(db))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        sql
    }
}

impl std::fmt::Debug for QueryBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBase")
            .field("targets", &self.targets.iter().map(|t| &t.key).collect::<Vec<_>>())
            .field("comparison", &self.comparison)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

/// `db.table.oid, db.table."a", ...` for one item type.
pub(crate) fn item_columns(db: &str, schema: &Schema) -> String {
    let table = format!("{db}.{}", schema.key().table_name());
    std::iter::once(format!("{table}.oid"))
        .chain(
            schema
                .attributes()
                .iter()
                .map(|a| format!("{table}.{}", quote(a.name()))),
        )
        .collect::<Vec<_>>()
        .join(", ")
}
