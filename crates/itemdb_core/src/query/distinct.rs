//! `SELECT DISTINCT` wrapper.

use super::base::QueryBase;
use super::Query;
use crate::error::StoreResult;
use itemdb_storage::Row;

/// Any query with duplicate result rows removed.
#[derive(Clone, Debug)]
pub struct Distinct<Q> {
    inner: Q,
}

impl<Q: Query> Distinct<Q> {
    pub(crate) fn new(inner: Q) -> Self {
        Self { inner }
    }

    /// The wrapped query.
    #[must_use]
    pub fn into_inner(self) -> Q {
        self.inner
    }
}

impl<Q: Query> Query for Distinct<Q> {
    type Output = Q::Output;

    fn base(&self) -> &QueryBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut QueryBase {
        self.inner.base_mut()
    }

    fn select_list(&self, db: &str) -> StoreResult<String> {
        self.inner.select_list(db)
    }

    fn massage(&self, row: Row) -> StoreResult<Q::Output> {
        self.inner.massage(row)
    }

    fn verb(&self) -> &'static str {
        "SELECT DISTINCT"
    }
}
