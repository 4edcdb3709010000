//! Queries over tuples of record types.

use super::base::{item_columns, QueryBase, QueryTarget};
use super::comparison::{Comparison, SortKey};
use super::item::take_item;
use super::Query;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::schema::Record;
use crate::store::Store;
use itemdb_storage::Row;
use std::marker::PhantomData;

/// A tuple of record types queried together.
///
/// Implemented for tuples of two to four [`Record`] types.
pub trait RecordSet: 'static {
    /// One result: a tuple of items.
    type Items;

    #[doc(hidden)]
    fn targets() -> Vec<QueryTarget>;

    #[doc(hidden)]
    fn select_list(store: &Store, db: &str) -> StoreResult<String>;

    #[doc(hidden)]
    fn massage(store: &Store, row: Row) -> StoreResult<Self::Items>;
}

macro_rules! record_set {
    ($($name:ident),+) => {
        impl<$($name: Record),+> RecordSet for ($($name,)+) {
            type Items = ($(Item<$name>,)+);

            fn targets() -> Vec<QueryTarget> {
                vec![$(QueryTarget::of::<$name>()),+]
            }

            fn select_list(store: &Store, db: &str) -> StoreResult<String> {
                let lists = [$(item_columns(db, &*store.ensure_registered::<$name>()?)),+];
                Ok(lists.join(", "))
            }

            fn massage(store: &Store, row: Row) -> StoreResult<Self::Items> {
                let mut values = row.into_iter();
                Ok(($(take_item::<$name>(store, &*store.ensure_registered::<$name>()?, &mut values)?,)+))
            }
        }
    };
}

record_set!(A, B);
record_set!(A, B, C);
record_set!(A, B, C, D);

/// Tuples of items of the types in `S`, related by a comparison.
///
/// The comparison must mention every member type; an unrelated table
/// would otherwise join as a cartesian product.
///
/// ```rust,ignore
/// let owned = store
///     .join::<(Person, Pet)>()
///     .filter(Pet::column("owner").eq_column(&Person::store_id_column()))
///     .all()?;
/// ```
pub struct JoinQuery<S: RecordSet> {
    base: QueryBase,
    _marker: PhantomData<fn() -> S>,
}

impl<S: RecordSet> Clone for JoinQuery<S> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S: RecordSet> JoinQuery<S> {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            base: QueryBase::new(store, S::targets()),
            _marker: PhantomData,
        }
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

    /// The first result, if any.
    ///
    /// # Errors
    ///
    /// Returns compile, backend or decode errors.
    pub fn first(&self) -> StoreResult<Option<S::Items>> {
        self.clone_query(Some(1)).iter().next().transpose()
    }
}

impl<S: RecordSet> Query for JoinQuery<S> {
    type Output = S::Items;

    fn base(&self) -> &QueryBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut QueryBase {
        &mut self.base
    }

    fn select_list(&self, db: &str) -> StoreResult<String> {
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.base.targets.iter().find(|t| !seen.insert(t.key.clone())) {
            return Err(StoreError::invalid_query(format!(
                "{} appears twice in one join",
                dup.key
            )));
        }
        S::select_list(&self.base.store, db)
    }

    fn massage(&self, row: Row) -> StoreResult<S::Items> {
        S::massage(&self.base.store, row)
    }
}

impl<S: RecordSet> std::fmt::Debug for JoinQuery<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinQuery").field("base", &self.base).finish()
    }
}
